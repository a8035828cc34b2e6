//! Review Collector Library
//!
//! Collects app store reviews for a fixed set of entities (e.g. banks),
//! maximising unique coverage while staying polite to the upstream.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    review-collector (Rust CLI)                      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐     │
//! │  │  Source         │  │  Paginated      │  │  Review         │     │
//! │  │  Resolver       │─►│  Fetcher        │─►│  Merger         │     │
//! │  └────────┬────────┘  └────────┬────────┘  └────────┬────────┘     │
//! │           └──────────┬─────────┘                    ▼              │
//! │              ┌───────┴─────────┐           ┌─────────────────┐     │
//! │              │ RetryController │           │  Quality Gate   │     │
//! │              │  + RateGate     │           └─────────────────┘     │
//! │              └───────┬─────────┘                                   │
//! │                      ▼                                             │
//! │              ReviewSource (Play Store)                             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Candidate identifiers
//! Store identifiers change over time, so each entity lists several. The
//! first one that answers a probe is used for the whole run.
//!
//! ## Ordering strategies
//! The store caps how deep one ordering can be paged. Fetching the same app
//! under several orderings (newest, most relevant, ...) and deduplicating
//! reaches more unique reviews than any single ordering.
//!
//! ## Target count
//! A floor, not a ceiling: fetching stops as soon as it is met, and fewer is
//! accepted once every strategy is exhausted or abandoned.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod clock;
pub mod collector;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod merger;
pub mod model;
pub mod quality;
pub mod rate_limiter;
pub mod resolver;
pub mod retry;
pub mod source;

pub use clock::{Clock, ManualClock, SharedClock, TokioClock};
pub use collector::{CollectionRun, Collector, RunMetrics};
pub use error::CollectError;
pub use model::{CollectionResult, EntityState, Record, StrategyOutcome, StrategyReport};
pub use quality::{QualityGate, QualityReport};
pub use source::{AppMetadata, PlayStoreSource, RawReview, ReviewPage, ReviewSource, SortOrder, SourceError};
