//! Identifier resolution.
//!
//! Each entity carries an ordered list of candidate store identifiers; the
//! resolver probes them in order and settles on the first one that answers.

use std::sync::Arc;
use tracing::{info, warn};

use review_common::EntityConfig;

use crate::error::CollectError;
use crate::model::ResolvedSource;
use crate::retry::RetryController;
use crate::source::ReviewSource;

// ============================================================================
// Entity Catalog
// ============================================================================

/// Immutable entity → candidates mapping, fixed for the life of a run.
#[derive(Debug, Clone)]
pub struct EntityCatalog {
    entities: Arc<[EntityConfig]>,
}

impl EntityCatalog {
    pub fn new(entities: Vec<EntityConfig>) -> Self {
        Self {
            entities: entities.into(),
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityConfig> {
        self.entities.iter().find(|e| e.id == entity_id)
    }

    /// Entities in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityConfig> {
        self.entities.iter()
    }

    pub fn entities(&self) -> &[EntityConfig] {
        &self.entities
    }
}

// ============================================================================
// Source Resolver
// ============================================================================

/// Finds a working upstream identifier for each entity.
#[derive(Clone)]
pub struct SourceResolver {
    catalog: EntityCatalog,
    source: Arc<dyn ReviewSource>,
    retry: RetryController,
}

impl SourceResolver {
    pub fn new(catalog: EntityCatalog, source: Arc<dyn ReviewSource>, retry: RetryController) -> Self {
        Self {
            catalog,
            source,
            retry,
        }
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    /// Probe `entity_id`'s candidates in order and return the first that works.
    ///
    /// A failing candidate is skipped. If none work the entity is
    /// unresolvable, which is reported as `ResolutionFailure`.
    pub async fn resolve(&self, entity_id: &str) -> Result<ResolvedSource, CollectError> {
        let entity = self.catalog.get(entity_id).ok_or_else(|| {
            CollectError::FatalConfiguration(format!("Unknown entity '{}'", entity_id))
        })?;

        let mut last_error = String::from("no candidates configured");

        for (idx, candidate) in entity.candidates.iter().enumerate() {
            let label = format!("probe {}", candidate);
            match self
                .retry
                .call(&label, || self.source.probe(candidate))
                .await
            {
                Ok(metadata) => {
                    info!(
                        entity = %entity.id,
                        identifier = %candidate,
                        candidate = idx + 1,
                        of = entity.candidates.len(),
                        title = %metadata.title,
                        score = ?metadata.score,
                        ratings = ?metadata.ratings,
                        installs = ?metadata.installs,
                        "Resolved entity identifier"
                    );
                    return Ok(ResolvedSource {
                        identifier: candidate.clone(),
                        metadata,
                        tried: idx + 1,
                    });
                }
                Err(abandoned) => {
                    info!(
                        entity = %entity.id,
                        identifier = %candidate,
                        error = %abandoned.last_error,
                        "Candidate identifier failed, trying next"
                    );
                    last_error = abandoned.last_error.to_string();
                }
            }
        }

        warn!(
            entity = %entity.id,
            tried = entity.candidates.len(),
            "No candidate identifier worked, entity is unresolvable"
        );

        Err(CollectError::ResolutionFailure {
            entity: entity.id.clone(),
            tried: entity.candidates.len(),
            reason: last_error,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SharedClock};
    use crate::rate_limiter::shared_gate;
    use crate::retry::{Backoff, RetryPolicy};
    use crate::source::{AppMetadata, ReviewPage, SortOrder, SourceError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Source where only the listed identifiers exist.
    struct ProbeOnlySource {
        live: Vec<&'static str>,
        probed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReviewSource for ProbeOnlySource {
        fn name(&self) -> &'static str {
            "probe_only"
        }

        async fn probe(&self, identifier: &str) -> Result<AppMetadata, SourceError> {
            self.probed.lock().unwrap().push(identifier.to_string());
            if self.live.contains(&identifier) {
                Ok(AppMetadata {
                    title: format!("{} app", identifier),
                    ..Default::default()
                })
            } else {
                Err(SourceError::NotFound(identifier.to_string()))
            }
        }

        async fn fetch_page(
            &self,
            _identifier: &str,
            _order: SortOrder,
            _token: Option<&str>,
            _page_size: usize,
        ) -> Result<ReviewPage, SourceError> {
            Err(SourceError::InvalidRequest("not used".into()))
        }
    }

    fn resolver(live: Vec<&'static str>) -> (SourceResolver, Arc<ProbeOnlySource>) {
        let clock: SharedClock = Arc::new(ManualClock::new());
        let retry = RetryController::new(
            RetryPolicy {
                max_attempts: 2,
                backoff: Backoff::Fixed(Duration::from_secs(1)),
                call_timeout: Duration::from_secs(5),
            },
            shared_gate("test", Duration::ZERO, Arc::clone(&clock)),
            clock,
        );
        let source = Arc::new(ProbeOnlySource {
            live,
            probed: Mutex::new(Vec::new()),
        });
        let catalog = EntityCatalog::new(vec![EntityConfig {
            id: "cbe".into(),
            name: "Commercial Bank of Ethiopia".into(),
            candidates: vec![
                "com.cbe.mobilebanking".into(),
                "com.cbe.ethiopia".into(),
                "com.combanketh.mobilebanking".into(),
            ],
        }]);
        let dyn_source: Arc<dyn ReviewSource> = source.clone();
        (SourceResolver::new(catalog, dyn_source, retry), source)
    }

    #[tokio::test]
    async fn test_third_candidate_selected() {
        let (resolver, source) = resolver(vec!["com.combanketh.mobilebanking"]);

        let resolved = resolver.resolve("cbe").await.unwrap();
        assert_eq!(resolved.identifier, "com.combanketh.mobilebanking");
        assert_eq!(resolved.tried, 3);
        assert_eq!(resolved.metadata.title, "com.combanketh.mobilebanking app");
        assert_eq!(source.probed.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stops_at_first_working_candidate() {
        let (resolver, source) = resolver(vec!["com.cbe.mobilebanking", "com.cbe.ethiopia"]);

        let resolved = resolver.resolve("cbe").await.unwrap();
        assert_eq!(resolved.identifier, "com.cbe.mobilebanking");
        assert_eq!(*source.probed.lock().unwrap(), vec!["com.cbe.mobilebanking"]);
    }

    #[tokio::test]
    async fn test_all_candidates_fail() {
        let (resolver, _) = resolver(vec![]);

        match resolver.resolve("cbe").await {
            Err(CollectError::ResolutionFailure { entity, tried, reason }) => {
                assert_eq!(entity, "cbe");
                assert_eq!(tried, 3);
                assert!(reason.contains("com.combanketh.mobilebanking"));
            }
            other => panic!("Expected ResolutionFailure, got {:?}", other.map(|r| r.identifier)),
        }
    }

    #[tokio::test]
    async fn test_unknown_entity_is_configuration_error() {
        let (resolver, _) = resolver(vec![]);
        assert!(resolver.resolve("awash").await.unwrap_err().is_fatal());
    }
}
