//! Per-entity deduplication.
//!
//! The merger owns an entity's records until they are handed to the caller.
//! Duplicate ids keep the first occurrence seen: strategies are processed in
//! configured order, so an earlier strategy's copy of a review always wins.

use std::collections::HashSet;

use crate::model::Record;
use crate::source::{RawReview, SortOrder};

/// Outcome of merging one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub duplicates: usize,
    pub malformed: usize,
}

/// Folds raw pages for one entity into an ordered set of unique records.
#[derive(Debug)]
pub struct ReviewMerger {
    entity_id: String,
    seen: HashSet<String>,
    records: Vec<Record>,
    duplicates: usize,
    malformed: usize,
}

impl ReviewMerger {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            seen: HashSet::new(),
            records: Vec::new(),
            duplicates: 0,
            malformed: 0,
        }
    }

    /// Merge a page produced under `strategy`.
    pub fn merge_page(&mut self, reviews: Vec<RawReview>, strategy: SortOrder) -> MergeStats {
        let mut stats = MergeStats::default();

        for raw in reviews {
            let Some(record) = self.normalize(raw, strategy) else {
                self.malformed += 1;
                stats.malformed += 1;
                continue;
            };

            if self.seen.contains(&record.record_id) {
                self.duplicates += 1;
                stats.duplicates += 1;
                continue;
            }

            self.seen.insert(record.record_id.clone());
            self.records.push(record);
            stats.added += 1;
        }

        stats
    }

    /// Convert a raw review into a record, or `None` if it is unusable.
    ///
    /// Id, a 1-5 rating and a timestamp are required. Missing text becomes
    /// empty, missing upvotes become 0, and blank replies are dropped.
    fn normalize(&self, raw: RawReview, strategy: SortOrder) -> Option<Record> {
        let record_id = raw.review_id.filter(|id| !id.trim().is_empty())?;
        let rating = raw
            .score
            .filter(|s| (1..=5).contains(s))
            .and_then(|s| u8::try_from(s).ok())?;
        let timestamp = raw.at?;

        Some(Record {
            record_id,
            text: raw.content.unwrap_or_default(),
            rating,
            timestamp,
            upvotes: raw.thumbs_up.and_then(|n| u64::try_from(n).ok()).unwrap_or(0),
            reply_text: raw.reply_content.filter(|r| !r.trim().is_empty()),
            entity_id: self.entity_id.clone(),
            source_tag: strategy.tag().to_string(),
        })
    }

    /// Unique records so far.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// Hand the records over, in first-seen order.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
