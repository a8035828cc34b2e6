//! Collection error taxonomy.
//!
//! Only `FatalConfiguration` stops a run; everything else is recorded on the
//! affected entity or in the quality report and the run carries on.

use thiserror::Error;

use crate::retry::CallAbandoned;
use crate::source::SourceError;

#[derive(Debug, Error)]
pub enum CollectError {
    /// Every candidate identifier failed probing
    #[error("No working identifier for '{entity}' ({tried} candidate(s) tried): {reason}")]
    ResolutionFailure {
        entity: String,
        tried: usize,
        reason: String,
    },

    /// Network, timeout or rate-limit failure that may be retried
    #[error("Transient fetch failure: {0}")]
    TransientFetchFailure(SourceError),

    /// Retries exhausted (or failure not worth retrying); the strategy is abandoned
    #[error("Permanent fetch failure: {0}")]
    PermanentFetchFailure(CallAbandoned),

    /// A quality threshold was not met
    #[error("Quality violation: {0}")]
    QualityViolation(String),

    /// Missing or invalid configuration; raised before any upstream call
    #[error("Fatal configuration error: {0}")]
    FatalConfiguration(String),
}

impl CollectError {
    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalConfiguration(_))
    }
}

impl From<CallAbandoned> for CollectError {
    fn from(err: CallAbandoned) -> Self {
        Self::PermanentFetchFailure(err)
    }
}

impl From<SourceError> for CollectError {
    fn from(err: SourceError) -> Self {
        if err.is_recoverable() {
            Self::TransientFetchFailure(err)
        } else {
            Self::PermanentFetchFailure(CallAbandoned {
                label: "upstream call".into(),
                attempts: 1,
                last_error: err,
            })
        }
    }
}

impl From<review_common::Error> for CollectError {
    fn from(err: review_common::Error) -> Self {
        Self::FatalConfiguration(err.to_string())
    }
}
