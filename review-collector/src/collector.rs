//! Collection orchestrator.
//!
//! Drives every entity through resolve → fetch (strategy by strategy) →
//! merge, in parallel up to `max_concurrency`, then runs the quality gate.
//!
//! ```text
//!   entities ──► [Semaphore] ──► worker per entity
//!                                  │
//!                                  ├─ SourceResolver::resolve
//!                                  ├─ for strategy in order:
//!                                  │     PageSequence::next ──► ReviewMerger
//!                                  └─ CollectionResult
//!   results (configured order) ──► QualityGate ──► CollectionRun
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use review_common::logging::generate_run_id;
use review_common::{entity_span, run_span, Config, EntityConfig};

use crate::clock::SharedClock;
use crate::error::CollectError;
use crate::fetcher::PaginatedFetcher;
use crate::merger::ReviewMerger;
use crate::model::{
    CollectionResult, EntityState, Record, StrategyOutcome, StrategyReport,
};
use crate::quality::{QualityGate, QualityReport};
use crate::rate_limiter::shared_gate;
use crate::resolver::{EntityCatalog, SourceResolver};
use crate::retry::{CallStatsSnapshot, RetryController, RetryPolicy};
use crate::source::{ReviewSource, SortOrder};

// ============================================================================
// Settings
// ============================================================================

/// Parse configured strategy tags, rejecting unknown ones.
pub fn parse_strategies(tags: &[String]) -> Result<Vec<SortOrder>, CollectError> {
    if tags.is_empty() {
        return Err(CollectError::FatalConfiguration(
            "At least one ordering strategy is required".into(),
        ));
    }

    tags.iter()
        .map(|tag| tag.parse::<SortOrder>().map_err(CollectError::FatalConfiguration))
        .collect()
}

// ============================================================================
// Collector
// ============================================================================

/// Runs collection for every configured entity.
///
/// Cheap to clone; clones share the source, rate gate and statistics.
#[derive(Clone)]
pub struct Collector {
    resolver: SourceResolver,
    fetcher: PaginatedFetcher,
    retry: RetryController,
    quality: QualityGate,
    strategies: Arc<[SortOrder]>,
    target_count: usize,
    max_concurrency: usize,
    run_timeout: Option<Duration>,
    clock: SharedClock,
}

impl Collector {
    /// Build a collector from validated configuration.
    ///
    /// Fails with `FatalConfiguration` before any upstream call if the
    /// configuration is invalid.
    pub fn new(
        config: &Config,
        source: Arc<dyn ReviewSource>,
        clock: SharedClock,
    ) -> Result<Self, CollectError> {
        config
            .validate()
            .map_err(|e| CollectError::FatalConfiguration(e.to_string()))?;

        let collector = &config.collector;
        let strategies = parse_strategies(&collector.ordering_strategies)?;

        // One gate for the whole run: every worker shares the upstream host.
        let gate = shared_gate(source.name(), collector.min_call_interval(), Arc::clone(&clock));
        let retry = RetryController::new(RetryPolicy::from_config(collector), gate, Arc::clone(&clock));

        let catalog = EntityCatalog::new(config.entities.clone());
        let resolver = SourceResolver::new(catalog, Arc::clone(&source), retry.clone());
        let fetcher = PaginatedFetcher::new(source, retry.clone(), collector.page_size);

        Ok(Self {
            resolver,
            fetcher,
            retry,
            quality: QualityGate::new(&config.quality),
            strategies: strategies.into(),
            target_count: collector.target_count_per_entity,
            max_concurrency: collector.max_concurrency.max(1),
            run_timeout: collector.run_timeout(),
            clock,
        })
    }

    pub fn strategies(&self) -> &[SortOrder] {
        &self.strategies
    }

    /// Collect every entity and evaluate the result.
    ///
    /// Never fails: per-entity problems are recorded on that entity's
    /// result. Cancelling `cancel` (or hitting the run timeout) stops
    /// workers between pages; their merged records are kept.
    pub async fn run(&self, cancel: CancellationToken) -> CollectionRun {
        let run_id = generate_run_id();
        let span = run_span!(run_id.as_str(), entities = self.resolver.catalog().entities().len());
        self.run_inner(run_id, cancel).instrument(span).await
    }

    async fn run_inner(&self, run_id: String, cancel: CancellationToken) -> CollectionRun {
        let started_at = Utc::now();
        let control = RunControl {
            token: cancel.child_token(),
            deadline: self.run_timeout.map(|limit| self.clock.now() + limit),
            clock: Arc::clone(&self.clock),
        };

        info!(
            entities = self.resolver.catalog().entities().len(),
            strategies = ?self.strategies.iter().map(|s| s.tag()).collect::<Vec<_>>(),
            target = self.target_count,
            max_concurrency = self.max_concurrency,
            "Starting collection run"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut workers = JoinSet::new();

        for (idx, entity) in self.resolver.catalog().iter().enumerate() {
            let this = self.clone();
            let entity = entity.clone();
            let control = control.clone();
            let semaphore = Arc::clone(&semaphore);
            let span = entity_span!(entity.id.as_str());

            workers.spawn(
                async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => this.collect_entity(&entity, &control).await,
                        Err(_) => CollectionResult::unresolved(
                            &entity.id,
                            &entity.name,
                            "worker pool closed",
                        ),
                    };
                    (idx, result)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<CollectionResult>> =
            (0..self.resolver.catalog().entities().len()).map(|_| None).collect();

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => error!(error = %e, "Entity worker failed"),
            }
        }

        // Entities keep their configured position even if a worker died.
        let results: Vec<CollectionResult> = slots
            .into_iter()
            .zip(self.resolver.catalog().iter())
            .map(|(slot, entity)| {
                slot.unwrap_or_else(|| {
                    CollectionResult::unresolved(&entity.id, &entity.name, "entity worker failed")
                })
            })
            .collect();

        let quality = self.quality.evaluate(&results);

        let run = CollectionRun {
            run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled: control.token.is_cancelled(),
            results,
            quality,
            upstream: self.retry.stats(),
        };
        run.log_summary();
        run
    }

    /// Resolve, fetch and merge one entity.
    async fn collect_entity(&self, entity: &EntityConfig, control: &RunControl) -> CollectionResult {
        let mut state = EntityState::Unresolved;

        if control.should_stop() {
            transition(&mut state, EntityState::Skipped);
            return CollectionResult::skipped(
                &entity.id,
                &entity.name,
                "run cancelled before collection started",
            );
        }

        transition(&mut state, EntityState::Resolving);
        let resolved = match self.resolver.resolve(&entity.id).await {
            Ok(resolved) => resolved,
            Err(e) => {
                transition(&mut state, EntityState::Unresolvable);
                return CollectionResult::unresolved(&entity.id, &entity.name, e.to_string());
            }
        };
        transition(&mut state, EntityState::Resolved);

        let mut merger = ReviewMerger::new(&entity.id);
        let mut reports = Vec::new();
        let mut cancelled = false;

        for (idx, &strategy) in self.strategies.iter().enumerate() {
            if merger.count() >= self.target_count {
                debug!(strategy = %strategy, "Target met, skipping remaining strategies");
                break;
            }
            if control.should_stop() {
                cancelled = true;
                break;
            }

            transition(&mut state, EntityState::Fetching { strategy_index: idx });
            let report = self
                .run_strategy(&resolved.identifier, strategy, &mut merger, control)
                .await;

            info!(
                strategy = %strategy,
                outcome = ?report.outcome,
                pages = report.pages,
                fetched = report.fetched,
                added = report.added,
                unique = merger.count(),
                "Strategy finished"
            );

            cancelled = report.outcome == StrategyOutcome::Cancelled;
            reports.push(report);
            if cancelled {
                break;
            }
        }

        let met = merger.count() >= self.target_count;
        transition(&mut state, EntityState::Done { partial: !met });

        if met {
            info!(count = merger.count(), "Entity collection complete");
        } else if cancelled {
            warn!(count = merger.count(), "Entity collection cancelled, keeping partial records");
        } else {
            warn!(
                count = merger.count(),
                target = self.target_count,
                "All strategies ended below target"
            );
        }

        let duplicates = merger.duplicates();
        let malformed = merger.malformed();

        CollectionResult {
            entity_id: entity.id.clone(),
            entity_name: entity.name.clone(),
            resolved: Some(resolved),
            state,
            records: merger.into_records(),
            strategies: reports,
            duplicates,
            malformed,
            error: None,
        }
    }

    /// Page through one strategy until it is exhausted, abandoned,
    /// cancelled, or the target is met.
    async fn run_strategy(
        &self,
        identifier: &str,
        strategy: SortOrder,
        merger: &mut ReviewMerger,
        control: &RunControl,
    ) -> StrategyReport {
        let mut pages = self.fetcher.pages(identifier, strategy);
        let mut fetched = 0;
        let mut added = 0;
        let mut error = None;

        let outcome = loop {
            if merger.count() >= self.target_count {
                break StrategyOutcome::Completed;
            }
            if control.should_stop() {
                break StrategyOutcome::Cancelled;
            }

            match pages.next().await {
                None => break StrategyOutcome::Exhausted,
                Some(Ok(page)) => {
                    fetched += page.reviews.len();
                    let stats = merger.merge_page(page.reviews, strategy);
                    added += stats.added;
                    debug!(
                        strategy = %strategy,
                        page = pages.pages(),
                        added = stats.added,
                        duplicates = stats.duplicates,
                        malformed = stats.malformed,
                        unique = merger.count(),
                        "Merged page"
                    );
                }
                Some(Err(abandoned)) => {
                    let err = CollectError::from(abandoned);
                    warn!(strategy = %strategy, error = %err, "Strategy abandoned");
                    error = Some(err.to_string());
                    break StrategyOutcome::Abandoned;
                }
            }
        };

        StrategyReport {
            strategy,
            outcome,
            pages: pages.pages(),
            fetched,
            added,
            error,
        }
    }
}

/// Run-wide stop signal: external cancellation or the run deadline,
/// whichever comes first. Checked between pages and between strategies.
#[derive(Clone)]
struct RunControl {
    token: CancellationToken,
    /// Clock offset at which the run times out
    deadline: Option<Duration>,
    clock: SharedClock,
}

impl RunControl {
    fn should_stop(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        match self.deadline {
            Some(deadline) if self.clock.now() >= deadline => {
                warn!(
                    deadline_secs = deadline.as_secs_f64(),
                    "Run timeout reached, cancelling"
                );
                self.token.cancel();
                true
            }
            _ => false,
        }
    }
}

fn transition(state: &mut EntityState, next: EntityState) {
    debug_assert!(
        state.can_transition_to(&next),
        "invalid entity transition {:?} -> {:?}",
        state,
        next
    );
    debug!(from = ?state, to = ?next, "Entity state");
    *state = next;
}

// ============================================================================
// Collection Run
// ============================================================================

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct CollectionRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True when the run was cancelled or timed out
    pub cancelled: bool,
    /// One result per entity, in configured order
    pub results: Vec<CollectionResult>,
    pub quality: QualityReport,
    pub upstream: CallStatsSnapshot,
}

/// Serializable metrics artifact for a run.
#[derive(Debug, Serialize)]
pub struct RunMetrics<'a> {
    pub run_id: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub pass: bool,
    pub record_counts: &'a std::collections::BTreeMap<String, usize>,
    pub missing_text_percentage: f64,
    pub violations: &'a [String],
    pub resolved: Vec<&'a str>,
    pub unresolved: Vec<&'a str>,
    pub skipped: Vec<&'a str>,
    pub entities: &'a [CollectionResult],
    pub upstream: CallStatsSnapshot,
}

impl CollectionRun {
    /// All records across entities, entity by entity.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.results.iter().flat_map(|r| r.records.iter())
    }

    pub fn total_records(&self) -> usize {
        self.results.iter().map(CollectionResult::count).sum()
    }

    pub fn resolved(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.is_resolved())
            .map(|r| r.entity_id.as_str())
            .collect()
    }

    /// Entities whose candidates all failed.
    pub fn unresolved(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.is_resolved() && !r.is_skipped())
            .map(|r| r.entity_id.as_str())
            .collect()
    }

    /// Entities never started because the run was cancelled first.
    pub fn skipped(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.is_skipped())
            .map(|r| r.entity_id.as_str())
            .collect()
    }

    pub fn result(&self, entity_id: &str) -> Option<&CollectionResult> {
        self.results.iter().find(|r| r.entity_id == entity_id)
    }

    pub fn metrics(&self) -> RunMetrics<'_> {
        RunMetrics {
            run_id: &self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            cancelled: self.cancelled,
            pass: self.quality.pass,
            record_counts: &self.quality.record_counts,
            missing_text_percentage: self.quality.missing_text_percentage,
            violations: &self.quality.violations,
            resolved: self.resolved(),
            unresolved: self.unresolved(),
            skipped: self.skipped(),
            entities: &self.results,
            upstream: self.upstream,
        }
    }

    /// End-of-run summary on the log stream.
    pub fn log_summary(&self) {
        for result in &self.results {
            match result.identifier() {
                Some(identifier) => info!(
                    entity = %result.entity_id,
                    identifier,
                    count = result.count(),
                    partial = result.is_partial(),
                    duplicates = result.duplicates,
                    malformed = result.malformed,
                    "Entity summary"
                ),
                None if result.is_skipped() => {
                    warn!(entity = %result.entity_id, "Entity skipped")
                }
                None => warn!(
                    entity = %result.entity_id,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Entity unresolved"
                ),
            }
        }

        let elapsed = (self.finished_at - self.started_at).num_milliseconds();
        info!(
            resolved = ?self.resolved(),
            unresolved = ?self.unresolved(),
            skipped = ?self.skipped(),
            total = self.total_records(),
            pass = self.quality.pass,
            cancelled = self.cancelled,
            upstream_attempts = self.upstream.attempts,
            upstream_retries = self.upstream.retries,
            upstream_abandoned = self.upstream.abandoned,
            duration_ms = elapsed,
            "Collection run finished"
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
