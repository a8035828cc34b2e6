//! End-to-end collection tests against a scripted review source.
//!
//! Time is virtual (`ManualClock`), so backoff and rate-gate waits cost
//! nothing and inter-call spacing can be asserted exactly.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use review_collector::clock::Clock;
use review_collector::{
    AppMetadata, CollectError, Collector, EntityState, ManualClock, RawReview, ReviewPage,
    ReviewSource, SortOrder, SourceError, StrategyOutcome,
};
use review_common::{CollectorConfig, Config, EntityConfig, QualityConfig};

// ============================================================================
// Scripted Source
// ============================================================================

#[derive(Debug, Clone)]
struct Call {
    kind: &'static str,
    identifier: String,
    strategy: Option<SortOrder>,
    token: Option<String>,
    at: Duration,
}

/// Review source driven by a script.
///
/// Pages are addressed by token `p{index}`; a page's next token points at
/// the following page, or is null on the last one. Unscripted
/// (identifier, strategy) pairs return an empty page.
struct ScriptedSource {
    clock: ManualClock,
    live: HashSet<String>,
    pages: HashMap<(String, SortOrder), Vec<Vec<RawReview>>>,
    failing: HashSet<(String, SortOrder)>,
    cancel_on_first_page: Option<CancellationToken>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedSource {
    fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            live: HashSet::new(),
            pages: HashMap::new(),
            failing: HashSet::new(),
            cancel_on_first_page: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn live(mut self, identifier: &str) -> Self {
        self.live.insert(identifier.to_string());
        self
    }

    fn pages(mut self, identifier: &str, strategy: SortOrder, pages: Vec<Vec<RawReview>>) -> Self {
        self.pages.insert((identifier.to_string(), strategy), pages);
        self
    }

    fn failing(mut self, identifier: &str, strategy: SortOrder) -> Self {
        self.failing.insert((identifier.to_string(), strategy));
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn page_calls(&self, identifier: &str, strategy: SortOrder) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind == "page" && c.identifier == identifier && c.strategy == Some(strategy))
            .collect()
    }

    fn record(&self, kind: &'static str, identifier: &str, strategy: Option<SortOrder>, token: Option<&str>) {
        self.calls.lock().unwrap().push(Call {
            kind,
            identifier: identifier.to_string(),
            strategy,
            token: token.map(str::to_string),
            at: self.clock.now(),
        });
    }
}

#[async_trait]
impl ReviewSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn probe(&self, identifier: &str) -> Result<AppMetadata, SourceError> {
        self.record("probe", identifier, None, None);
        if self.live.contains(identifier) {
            Ok(AppMetadata {
                title: format!("{identifier} listing"),
                score: Some(4.0),
                ratings: Some(1000),
                installs: Some("100K+".into()),
            })
        } else {
            Err(SourceError::NotFound(identifier.to_string()))
        }
    }

    async fn fetch_page(
        &self,
        identifier: &str,
        order: SortOrder,
        token: Option<&str>,
        page_size: usize,
    ) -> Result<ReviewPage, SourceError> {
        self.record("page", identifier, Some(order), token);

        if self.failing.contains(&(identifier.to_string(), order)) {
            return Err(SourceError::Network("connection reset by peer".into()));
        }

        let Some(script) = self.pages.get(&(identifier.to_string(), order)) else {
            return Ok(ReviewPage::default());
        };

        let index = match token {
            None => 0,
            Some(t) => t.trim_start_matches('p').parse::<usize>().unwrap(),
        };
        let mut reviews = script.get(index).cloned().unwrap_or_default();
        reviews.truncate(page_size);
        let next_token = (index + 1 < script.len()).then(|| format!("p{}", index + 1));

        if let Some(cancel) = &self.cancel_on_first_page {
            cancel.cancel();
        }

        Ok(ReviewPage {
            reviews,
            next_token,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn review(id: String, text: &str) -> RawReview {
    RawReview {
        review_id: Some(id),
        content: Some(text.to_string()),
        score: Some(3),
        at: Utc.timestamp_opt(1_700_000_000, 0).single(),
        thumbs_up: Some(1),
        ..Default::default()
    }
}

fn reviews(prefix: &str, ids: Range<usize>) -> Vec<RawReview> {
    ids.map(|i| review(format!("{prefix}-{i}"), "solid app")).collect()
}

fn entity(id: &str, candidates: &[&str]) -> EntityConfig {
    EntityConfig {
        id: id.to_string(),
        name: format!("{} Bank", id.to_uppercase()),
        candidates: candidates.iter().map(|c| c.to_string()).collect(),
    }
}

fn config(entities: Vec<EntityConfig>, target: usize) -> Config {
    Config {
        collector: CollectorConfig {
            target_count_per_entity: target,
            max_retries: 3,
            backoff_secs: 5.0,
            min_call_interval_secs: 1.0,
            page_size: 100,
            ordering_strategies: vec!["newest".into(), "most_relevant".into()],
            max_concurrency: 2,
            ..Default::default()
        },
        quality: QualityConfig {
            min_acceptable_count_per_entity: 0,
            max_acceptable_missing_pct: 10.0,
        },
        entities,
        ..Default::default()
    }
}

fn collector(config: &Config, source: &Arc<ScriptedSource>, clock: &ManualClock) -> Collector {
    let source: Arc<dyn ReviewSource> = source.clone();
    Collector::new(config, source, Arc::new(clock.clone())).unwrap()
}

fn assert_unique(ids: impl Iterator<Item = String>) {
    let mut seen = HashSet::new();
    for id in ids {
        assert!(seen.insert(id.clone()), "duplicate record id {id}");
    }
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_third_candidate_resolves_and_keeps_position() {
    let clock = ManualClock::new();
    let source = Arc::new(
        ScriptedSource::new(&clock)
            .live("com.awash.bank")
            .live("com.combanketh.mobilebanking")
            .pages("com.awash.bank", SortOrder::Newest, vec![reviews("aw", 0..10)])
            .pages("com.combanketh.mobilebanking", SortOrder::Newest, vec![reviews("cbe", 0..10)]),
    );
    let config = config(
        vec![
            entity("awash", &["com.awash.bank"]),
            entity(
                "cbe",
                &["com.cbe.mobilebanking", "com.cbe.ethiopia", "com.combanketh.mobilebanking"],
            ),
            entity("dashen", &["com.dashen.sc", "com.dashen.bank"]),
        ],
        10,
    );

    let run = collector(&config, &source, &clock)
        .run(CancellationToken::new())
        .await;

    let order: Vec<_> = run.results.iter().map(|r| r.entity_id.as_str()).collect();
    assert_eq!(order, vec!["awash", "cbe", "dashen"]);

    let cbe = &run.results[1];
    assert_eq!(cbe.identifier(), Some("com.combanketh.mobilebanking"));
    assert_eq!(cbe.resolved.as_ref().unwrap().tried, 3);
    assert_eq!(cbe.count(), 10);

    // Unresolvable entity is excluded from fetching and does not touch the others.
    let dashen = &run.results[2];
    assert_eq!(dashen.state, EntityState::Unresolvable);
    assert!(dashen.records.is_empty());
    assert!(source.calls().iter().all(|c| !(c.kind == "page" && c.identifier.starts_with("com.dashen"))));
    assert_eq!(run.results[0].count(), 10);

    assert_eq!(run.resolved(), vec!["awash", "cbe"]);
    assert_eq!(run.unresolved(), vec!["dashen"]);
}

// ============================================================================
// Multi-Strategy Coverage
// ============================================================================

#[tokio::test]
async fn test_overlapping_strategies_reach_target_exactly() {
    let clock = ManualClock::new();
    // Newest: 150 unique then exhausted. Most relevant: 120, of which 20
    // overlap with newest, followed by more pages that must never be asked for.
    let mut relevant_first = reviews("cbe", 130..150);
    relevant_first.extend(reviews("cbe", 1000..1080));
    let source = Arc::new(
        ScriptedSource::new(&clock)
            .live("com.cbe")
            .pages(
                "com.cbe",
                SortOrder::Newest,
                vec![reviews("cbe", 0..100), reviews("cbe", 100..150)],
            )
            .pages(
                "com.cbe",
                SortOrder::MostRelevant,
                vec![relevant_first, reviews("cbe", 1080..1100), reviews("cbe", 2000..2100)],
            ),
    );
    let config = config(vec![entity("cbe", &["com.cbe"])], 250);

    let run = collector(&config, &source, &clock)
        .run(CancellationToken::new())
        .await;
    let cbe = &run.results[0];

    assert_eq!(cbe.count(), 250);
    assert_eq!(cbe.duplicates, 20);
    assert_unique(cbe.records.iter().map(|r| r.record_id.clone()));
    assert_eq!(cbe.state, EntityState::Done { partial: false });

    assert_eq!(cbe.strategies.len(), 2);
    assert_eq!(cbe.strategies[0].outcome, StrategyOutcome::Exhausted);
    assert_eq!(cbe.strategies[1].outcome, StrategyOutcome::Completed);

    // Overlapping ids keep the newest-strategy copy.
    let overlap = cbe.records.iter().find(|r| r.record_id == "cbe-140").unwrap();
    assert_eq!(overlap.source_tag, "newest");

    // Switching strategy reset the token; the third relevant page was never requested.
    let relevant = source.page_calls("com.cbe", SortOrder::MostRelevant);
    assert_eq!(relevant.len(), 2);
    assert_eq!(relevant[0].token, None);
    assert_eq!(relevant[1].token.as_deref(), Some("p1"));
}

#[tokio::test]
async fn test_no_page_request_after_target_met() {
    let clock = ManualClock::new();
    let source = Arc::new(
        ScriptedSource::new(&clock)
            .live("com.awash.bank")
            .pages(
                "com.awash.bank",
                SortOrder::Newest,
                vec![reviews("aw", 0..100), reviews("aw", 100..200), reviews("aw", 200..300)],
            )
            .pages("com.awash.bank", SortOrder::MostRelevant, vec![reviews("aw", 500..600)]),
    );
    let config = config(vec![entity("awash", &["com.awash.bank"])], 100);

    let run = collector(&config, &source, &clock)
        .run(CancellationToken::new())
        .await;

    assert_eq!(run.results[0].count(), 100);
    assert_eq!(source.page_calls("com.awash.bank", SortOrder::Newest).len(), 1);
    assert!(source.page_calls("com.awash.bank", SortOrder::MostRelevant).is_empty());
    assert_eq!(run.results[0].strategies.len(), 1);
}

#[tokio::test]
async fn test_empty_page_switches_strategy() {
    let clock = ManualClock::new();
    // Newest returns an empty page that still carries a token.
    let source = Arc::new(
        ScriptedSource::new(&clock)
            .live("com.dashen.sc")
            .pages(
                "com.dashen.sc",
                SortOrder::Newest,
                vec![Vec::new(), reviews("ds", 0..50)],
            )
            .pages("com.dashen.sc", SortOrder::MostRelevant, vec![reviews("ds", 100..130)]),
    );
    let config = config(vec![entity("dashen", &["com.dashen.sc"])], 400);

    let run = collector(&config, &source, &clock)
        .run(CancellationToken::new())
        .await;

    let newest = source.page_calls("com.dashen.sc", SortOrder::Newest);
    assert_eq!(newest.len(), 1);

    let pages: Vec<_> = source.calls().into_iter().filter(|c| c.kind == "page").collect();
    assert_eq!(pages[1].strategy, Some(SortOrder::MostRelevant));
    assert_eq!(pages[1].token, None);

    let dashen = &run.results[0];
    assert_eq!(dashen.count(), 30);
    assert_eq!(dashen.state, EntityState::Done { partial: true });
    assert!(dashen
        .strategies
        .iter()
        .all(|s| s.outcome == StrategyOutcome::Exhausted));
}

// ============================================================================
// Retries and Pacing
// ============================================================================

#[tokio::test]
async fn test_failing_strategy_is_abandoned_after_max_retries() {
    let clock = ManualClock::new();
    let source = Arc::new(
        ScriptedSource::new(&clock)
            .live("com.cbe")
            .failing("com.cbe", SortOrder::Newest)
            .pages("com.cbe", SortOrder::MostRelevant, vec![reviews("cbe", 0..40)]),
    );
    let config = config(vec![entity("cbe", &["com.cbe"])], 400);

    let run = collector(&config, &source, &clock)
        .run(CancellationToken::new())
        .await;

    // max_retries = 3 total attempts, never a fourth.
    assert_eq!(source.page_calls("com.cbe", SortOrder::Newest).len(), 3);

    let cbe = &run.results[0];
    assert_eq!(cbe.strategies[0].outcome, StrategyOutcome::Abandoned);
    assert!(cbe.strategies[0].error.as_deref().unwrap().contains("connection reset"));
    assert_eq!(cbe.strategies[1].outcome, StrategyOutcome::Exhausted);
    assert_eq!(cbe.count(), 40);
    assert_eq!(run.upstream.abandoned, 1);
    assert_eq!(run.upstream.retries, 2);
}

#[tokio::test]
async fn test_calls_are_spaced_by_min_interval() {
    let clock = ManualClock::new();
    let mut source = ScriptedSource::new(&clock);
    for bank in ["cbe", "awash", "dashen"] {
        let id = format!("com.{bank}");
        source = source
            .live(&id)
            .pages(
                &id,
                SortOrder::Newest,
                vec![reviews(bank, 0..100), reviews(bank, 100..200)],
            )
            .pages(&id, SortOrder::MostRelevant, vec![reviews(bank, 200..250)]);
    }
    let source = Arc::new(source.failing("com.awash", SortOrder::MostRelevant));
    let config = config(
        vec![
            entity("cbe", &["com.cbe"]),
            entity("awash", &["com.awash"]),
            entity("dashen", &["com.dashen"]),
        ],
        400,
    );

    collector(&config, &source, &clock)
        .run(CancellationToken::new())
        .await;

    let mut times: Vec<_> = source.calls().iter().map(|c| c.at).collect();
    times.sort();
    assert!(times.len() > 10);
    for pair in times.windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_secs(1),
            "calls {:?} and {:?} closer than the minimum interval",
            pair[0],
            pair[1]
        );
    }
}

// ============================================================================
// Quality Gate
// ============================================================================

#[tokio::test]
async fn test_missing_text_fails_gate_but_run_completes() {
    let clock = ManualClock::new();
    let mut page = reviews("aw", 0..88);
    page.extend((88..100).map(|i| review(format!("aw-{i}"), "")));
    let source = Arc::new(
        ScriptedSource::new(&clock)
            .live("com.awash.bank")
            .pages("com.awash.bank", SortOrder::Newest, vec![page]),
    );
    let config = config(vec![entity("awash", &["com.awash.bank"])], 100);

    let run = collector(&config, &source, &clock)
        .run(CancellationToken::new())
        .await;

    assert!(!run.quality.pass);
    assert_eq!(run.quality.missing_text_percentage, 12.0);
    assert_eq!(run.quality.record_counts["awash"], 100);
    assert_eq!(run.total_records(), 100);
    assert!(run.quality.errors().iter().all(|e| !e.is_fatal()));
}

// ============================================================================
// Cancellation and Configuration
// ============================================================================

#[tokio::test]
async fn test_cancellation_keeps_merged_records() {
    let clock = ManualClock::new();
    let cancel = CancellationToken::new();
    let mut source = ScriptedSource::new(&clock).live("com.cbe").pages(
        "com.cbe",
        SortOrder::Newest,
        vec![reviews("cbe", 0..100), reviews("cbe", 100..200)],
    );
    source.cancel_on_first_page = Some(cancel.clone());
    let source = Arc::new(source);
    let config = config(vec![entity("cbe", &["com.cbe"])], 400);

    let run = collector(&config, &source, &clock).run(cancel).await;

    let cbe = &run.results[0];
    assert!(run.cancelled);
    assert_eq!(cbe.count(), 100);
    assert_eq!(cbe.state, EntityState::Done { partial: true });
    assert_eq!(cbe.strategies.len(), 1);
    assert_eq!(cbe.strategies[0].outcome, StrategyOutcome::Cancelled);
    assert_eq!(source.page_calls("com.cbe", SortOrder::Newest).len(), 1);
}

#[tokio::test]
async fn test_run_timeout_stops_between_pages_and_skips_waiting_entities() {
    let clock = ManualClock::new();
    let source = Arc::new(
        ScriptedSource::new(&clock)
            .live("com.cbe")
            .live("com.awash")
            .pages(
                "com.cbe",
                SortOrder::Newest,
                vec![reviews("cbe", 0..100), reviews("cbe", 100..200), reviews("cbe", 200..300)],
            )
            .pages(
                "com.awash",
                SortOrder::Newest,
                vec![
                    reviews("awash", 0..100),
                    reviews("awash", 100..200),
                    reviews("awash", 200..300),
                ],
            ),
    );
    let mut config = config(
        vec![entity("cbe", &["com.cbe"]), entity("awash", &["com.awash"])],
        1000,
    );
    config.collector.max_concurrency = 1;
    // Probe at 0s, pages at 1s and 2s; the deadline is hit before a third page.
    config.collector.run_timeout_secs = Some(2);

    let run = collector(&config, &source, &clock).run(CancellationToken::new()).await;

    assert!(run.cancelled);
    assert_eq!(run.results.len(), 2);

    let started: Vec<_> = run.results.iter().filter(|r| !r.is_skipped()).collect();
    assert_eq!(started.len(), 1);
    let started = started[0];
    assert_eq!(started.count(), 200);
    assert_eq!(started.state, EntityState::Done { partial: true });
    assert_eq!(started.strategies[0].outcome, StrategyOutcome::Cancelled);
    assert_unique(started.records.iter().map(|r| r.record_id.clone()));

    let skipped = run.results.iter().find(|r| r.is_skipped()).unwrap();
    assert_eq!(skipped.state, EntityState::Skipped);
    assert_eq!(run.skipped(), vec![skipped.entity_id.as_str()]);
    assert!(run.unresolved().is_empty());
    assert!(run
        .quality
        .violations
        .iter()
        .all(|v| !v.contains("unresolved")));

    // Two pages for the started entity, nothing at all for the skipped one.
    assert_eq!(source.calls().len(), 3);
    assert_eq!(clock.now(), Duration::from_secs(2));
}

#[tokio::test]
async fn test_invalid_configuration_aborts_before_any_call() {
    let clock = ManualClock::new();
    let source = Arc::new(ScriptedSource::new(&clock).live("com.cbe"));

    let mut bad = config(vec![entity("cbe", &["com.cbe"])], 100);
    bad.collector.ordering_strategies = vec!["newest".into(), "loudest".into()];
    let dyn_source: Arc<dyn ReviewSource> = source.clone();
    let err = Collector::new(&bad, dyn_source, Arc::new(clock.clone())).err().unwrap();
    assert!(matches!(err, CollectError::FatalConfiguration(_)));

    let mut huge_backoff = config(vec![entity("cbe", &["com.cbe"])], 100);
    huge_backoff.collector.backoff_secs = 1e20;
    huge_backoff.collector.max_backoff_secs = 1e20;
    let dyn_source: Arc<dyn ReviewSource> = source.clone();
    let err = Collector::new(&huge_backoff, dyn_source, Arc::new(clock.clone())).err().unwrap();
    assert!(matches!(err, CollectError::FatalConfiguration(_)));

    let empty = config(Vec::new(), 100);
    let dyn_source: Arc<dyn ReviewSource> = source.clone();
    assert!(Collector::new(&empty, dyn_source, Arc::new(clock.clone()))
        .err()
        .unwrap()
        .is_fatal());

    assert!(source.calls().is_empty());
}
