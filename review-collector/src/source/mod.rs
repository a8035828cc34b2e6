//! Upstream review source abstraction.
//!
//! Defines the `ReviewSource` trait every upstream must implement, the raw
//! page shapes it returns, and the error taxonomy the retry controller uses
//! to decide whether an attempt is worth repeating.

pub mod play_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use play_store::PlayStoreSource;

// ============================================================================
// Ordering Strategy
// ============================================================================

/// Retrieval ordering requested from the upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    MostRelevant,
    Newest,
    Rating,
}

impl SortOrder {
    /// Stable tag carried into records and the export's `source_tag` column.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::MostRelevant => "most_relevant",
            Self::Newest => "newest",
            Self::Rating => "rating",
        }
    }

    /// Numeric sort code understood by the Play Store review RPC.
    pub fn code(&self) -> u8 {
        match self {
            Self::MostRelevant => 1,
            Self::Newest => 2,
            Self::Rating => 3,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "most_relevant" | "relevant" => Ok(Self::MostRelevant),
            "newest" => Ok(Self::Newest),
            "rating" => Ok(Self::Rating),
            other => Err(format!("Unknown ordering strategy: {}", other)),
        }
    }
}

// ============================================================================
// Source Payloads
// ============================================================================

/// Metadata exposed by a successful existence probe.
///
/// Only used for observability and the app info export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Store listing title
    pub title: String,
    /// Average rating
    pub score: Option<f64>,
    /// Total number of ratings
    pub ratings: Option<u64>,
    /// Install bracket, e.g. "1,000,000+"
    pub installs: Option<String>,
}

/// One review exactly as the upstream returned it.
///
/// Every field is optional; the merger decides what is usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReview {
    pub review_id: Option<String>,
    pub user_name: Option<String>,
    pub content: Option<String>,
    pub score: Option<i64>,
    pub at: Option<DateTime<Utc>>,
    pub thumbs_up: Option<i64>,
    pub reply_content: Option<String>,
    pub app_version: Option<String>,
}

/// One page of raw reviews plus the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct ReviewPage {
    pub reviews: Vec<RawReview>,
    pub next_token: Option<String>,
}

impl ReviewPage {
    /// True when no further page can follow this one.
    pub fn is_last(&self) -> bool {
        self.reviews.is_empty() || self.next_token.is_none()
    }
}

// ============================================================================
// Source Error
// ============================================================================

/// Errors returned by a review source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Network error (connection failed, reset)
    Network(String),
    /// The attempt exceeded the per-call timeout
    Timeout,
    /// Upstream asked us to slow down
    RateLimited { retry_after_secs: Option<u64> },
    /// The identifier does not exist upstream
    NotFound(String),
    /// Upstream is temporarily unavailable (5xx)
    Unavailable(String),
    /// Response could not be parsed
    Malformed(String),
    /// Invalid request parameters
    InvalidRequest(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Timeout => write!(f, "Request timed out"),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::Unavailable(msg) => write!(f, "Source unavailable: {}", msg),
            Self::Malformed(msg) => write!(f, "Malformed response: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

impl SourceError {
    /// Check if the error is recoverable (worth retrying)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::RateLimited { .. } | Self::Unavailable(_)
        )
    }

    /// Minimum wait requested by the upstream, if any.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(std::time::Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

// ============================================================================
// Review Source Trait
// ============================================================================

/// Trait for upstream review sources.
///
/// Implementations perform exactly one upstream request per call; retries,
/// pacing and timeouts are applied by the caller.
#[async_trait]
pub trait ReviewSource: Send + Sync {
    /// Source name for logging (e.g., "play_store")
    fn name(&self) -> &'static str;

    /// Check that `identifier` exists and return its listing metadata.
    async fn probe(&self, identifier: &str) -> Result<AppMetadata, SourceError>;

    /// Fetch one page of reviews.
    ///
    /// # Arguments
    /// * `identifier` - Resolved upstream identifier
    /// * `order` - Ordering strategy
    /// * `token` - Continuation token from the previous page, `None` for the first
    /// * `page_size` - Maximum reviews to return
    async fn fetch_page(
        &self,
        identifier: &str,
        order: SortOrder,
        token: Option<&str>,
        page_size: usize,
    ) -> Result<ReviewPage, SourceError>;
}

// ============================================================================
// Tests
// ============================================================================
