//! Core data model: records, per-entity lifecycle, and collection results.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::source::{AppMetadata, SortOrder};

// ============================================================================
// Record
// ============================================================================

/// One deduplicated review, immutable once merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Upstream review id, unique within an entity
    pub record_id: String,
    /// Review body; empty when the upstream sent none
    pub text: String,
    /// Star rating, 1-5
    pub rating: u8,
    pub timestamp: DateTime<Utc>,
    pub upvotes: u64,
    pub reply_text: Option<String>,
    /// Owning entity id
    pub entity_id: String,
    /// Tag of the ordering strategy that first produced this record
    pub source_tag: String,
}

impl Record {
    /// Text is missing when empty or whitespace only.
    pub fn has_missing_text(&self) -> bool {
        self.text.trim().is_empty()
    }
}

// ============================================================================
// Continuation State
// ============================================================================

/// Cursor for one (entity, strategy) page sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationState {
    /// Opaque upstream token; `None` before the first page
    pub token: Option<String>,
    pub strategy: SortOrder,
    pub page_size: usize,
}

impl ContinuationState {
    /// Fresh state for a new strategy.
    pub fn start(strategy: SortOrder, page_size: usize) -> Self {
        Self {
            token: None,
            strategy,
            page_size,
        }
    }
}

// ============================================================================
// Entity Lifecycle
// ============================================================================

/// Per-entity state machine.
///
/// ```text
/// Unresolved -> Resolving -> Resolved | Unresolvable
/// Resolved -> Fetching(0) -> Fetching(i+1) ... -> Done
/// Unresolved -> Skipped   (run cancelled before the entity started)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntityState {
    Unresolved,
    Resolving,
    Resolved,
    Fetching { strategy_index: usize },
    Unresolvable,
    Done { partial: bool },
    Skipped,
}

impl EntityState {
    /// Whether the machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &EntityState) -> bool {
        use EntityState::*;
        match (self, next) {
            (Unresolved, Resolving) | (Unresolved, Skipped) => true,
            (Resolving, Resolved) | (Resolving, Unresolvable) => true,
            (Resolved, Fetching { strategy_index: 0 }) => true,
            (Resolved, Done { .. }) => true,
            (Fetching { strategy_index: i }, Fetching { strategy_index: j }) => *j == i + 1,
            (Fetching { .. }, Done { .. }) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Unresolvable | Self::Done { .. } | Self::Skipped)
    }
}

// ============================================================================
// Strategy Outcome
// ============================================================================

/// How one ordering strategy ended for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyOutcome {
    /// The target count was reached during this strategy
    Completed,
    /// The upstream ran out of pages
    Exhausted,
    /// A page call was abandoned after retries
    Abandoned,
    /// The run was cancelled mid-strategy
    Cancelled,
}

/// Per-strategy bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyReport {
    pub strategy: SortOrder,
    pub outcome: StrategyOutcome,
    /// Pages successfully fetched
    pub pages: usize,
    /// Raw reviews received
    pub fetched: usize,
    /// New unique records added to the entity's set
    pub added: usize,
    /// Abandonment reason, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Collection Result
// ============================================================================

/// The identifier a resolver settled on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSource {
    pub identifier: String,
    pub metadata: AppMetadata,
    /// Candidates probed before (and including) the winner
    pub tried: usize,
}

/// Final outcome for one entity.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionResult {
    pub entity_id: String,
    pub entity_name: String,
    /// `None` means the entity was unresolvable
    pub resolved: Option<ResolvedSource>,
    pub state: EntityState,
    /// Unique records in first-seen order
    #[serde(skip)]
    pub records: Vec<Record>,
    pub strategies: Vec<StrategyReport>,
    /// Duplicate ids discarded by the merger
    pub duplicates: usize,
    /// Raw reviews rejected as unusable
    pub malformed: usize,
    /// Set when the entity could not be processed at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectionResult {
    /// Result for an entity whose candidates all failed.
    pub fn unresolved(entity_id: &str, entity_name: &str, error: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            entity_name: entity_name.to_string(),
            resolved: None,
            state: EntityState::Unresolvable,
            records: Vec::new(),
            strategies: Vec::new(),
            duplicates: 0,
            malformed: 0,
            error: Some(error.into()),
        }
    }

    /// Result for an entity the run never started on.
    pub fn skipped(entity_id: &str, entity_name: &str, reason: impl Into<String>) -> Self {
        Self {
            state: EntityState::Skipped,
            ..Self::unresolved(entity_id, entity_name, reason)
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.state == EntityState::Skipped
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn identifier(&self) -> Option<&str> {
        self.resolved.as_ref().map(|r| r.identifier.as_str())
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.state, EntityState::Done { partial: true })
    }
}
