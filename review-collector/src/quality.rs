//! Post-collection quality gate.
//!
//! The gate reports, it never aborts: callers decide what a failing report
//! means (the CLI only changes its exit code under `--strict`).

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use review_common::util::percentage;
use review_common::QualityConfig;

use crate::error::CollectError;
use crate::model::CollectionResult;

/// Gate verdict plus the metrics it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub pass: bool,
    /// Final count per entity; unresolved entities count as 0
    pub record_counts: BTreeMap<String, usize>,
    /// Share of all records with empty text, in percent
    pub missing_text_percentage: f64,
    pub total_records: usize,
    pub missing_text_records: usize,
    /// Human-readable reasons for a failing verdict
    pub violations: Vec<String>,
}

impl QualityReport {
    /// Violations as typed errors.
    pub fn errors(&self) -> Vec<CollectError> {
        self.violations
            .iter()
            .cloned()
            .map(CollectError::QualityViolation)
            .collect()
    }
}

/// Threshold checks over the aggregate collection output.
#[derive(Debug, Clone)]
pub struct QualityGate {
    min_count_per_entity: usize,
    max_missing_pct: f64,
}

impl QualityGate {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            min_count_per_entity: config.min_acceptable_count_per_entity,
            max_missing_pct: config.max_acceptable_missing_pct,
        }
    }

    /// Evaluate the results of a run.
    pub fn evaluate(&self, results: &[CollectionResult]) -> QualityReport {
        let mut violations = Vec::new();
        let mut record_counts = BTreeMap::new();
        let mut total_records = 0;
        let mut missing_text_records = 0;

        for result in results {
            let count = result.count();
            record_counts.insert(result.entity_id.clone(), count);
            total_records += count;
            missing_text_records += result.records.iter().filter(|r| r.has_missing_text()).count();

            if count < self.min_count_per_entity {
                let reason = if result.is_resolved() {
                    format!(
                        "{}: {} records, below minimum of {}",
                        result.entity_id, count, self.min_count_per_entity
                    )
                } else if result.is_skipped() {
                    format!("{}: skipped, run cancelled before collection", result.entity_id)
                } else {
                    format!("{}: unresolved, no records collected", result.entity_id)
                };
                violations.push(reason);
            }
        }

        // Compare the exact share; only the reported value is rounded.
        let exact_missing_pct = if total_records == 0 {
            0.0
        } else {
            (missing_text_records as f64 * 100.0) / total_records as f64
        };
        let missing_text_percentage = percentage(missing_text_records, total_records);
        if exact_missing_pct > self.max_missing_pct {
            violations.push(format!(
                "missing text {:.3}% exceeds maximum of {:.2}%",
                exact_missing_pct, self.max_missing_pct
            ));
        }

        let report = QualityReport {
            pass: violations.is_empty(),
            record_counts,
            missing_text_percentage,
            total_records,
            missing_text_records,
            violations,
        };

        if report.pass {
            info!(
                total = report.total_records,
                missing_text_pct = report.missing_text_percentage,
                "Quality gate passed"
            );
        } else {
            for violation in &report.violations {
                warn!(violation = %violation, "Quality gate violation");
            }
            warn!(
                total = report.total_records,
                missing_text_pct = report.missing_text_percentage,
                violations = report.violations.len(),
                "Quality gate failed"
            );
        }

        report
    }
}
