//! Configuration validation.
//!
//! Any error returned here is fatal: the collector refuses to start and no
//! upstream call is made.

use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::config::{CollectorConfig, Config, EntityConfig, QualityConfig, StorageConfig};

/// Upper bound accepted for `collector.page_size`.
pub const MAX_PAGE_SIZE: usize = 200;

/// Upper bound for backoff and call-spacing delays, in seconds.
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Upper bound for per-call and run timeouts, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn delay_in_range(secs: f64) -> bool {
    secs.is_finite() && (0.0..=MAX_DELAY_SECS).contains(&secs)
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

fn collapse(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(ValidationError::Multiple(errors))
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.collector.validate() {
            errors.push(e);
        }

        if let Err(e) = self.quality.validate() {
            errors.push(e);
        }

        if let Err(e) = self.storage.validate() {
            errors.push(e);
        }

        if let Err(e) = self.validate_entities() {
            errors.push(e);
        }

        collapse(errors)
    }

    fn validate_entities(&self) -> ValidationResult<()> {
        if self.entities.is_empty() {
            return Err(ValidationError::MissingField {
                field: "entities".into(),
            });
        }

        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for entity in &self.entities {
            if let Err(e) = entity.validate() {
                errors.push(e);
            }
            if !seen.insert(entity.id.as_str()) {
                errors.push(ValidationError::Conflict {
                    reason: format!("Entity id '{}' is declared more than once", entity.id),
                });
            }
        }

        collapse(errors)
    }

    /// Load from `dir` (or the default directory), apply environment
    /// overrides, and validate.
    pub fn load_and_validate(dir: Option<&Path>) -> crate::Result<Self> {
        let loaded = match dir {
            Some(dir) => Self::load_from_dir(dir),
            None => Self::load(),
        };
        let mut config = loaded.map_err(|e| crate::Error::Config(format!("{e:#}")))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

impl Validate for CollectorConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.target_count_per_entity == 0 {
            errors.push(invalid("collector.target_count_per_entity", "must be greater than 0"));
        }

        if self.max_retries == 0 {
            errors.push(invalid(
                "collector.max_retries",
                "must allow at least one attempt",
            ));
        }

        if !delay_in_range(self.backoff_secs) {
            errors.push(invalid(
                "collector.backoff_secs",
                format!("must be between 0 and {MAX_DELAY_SECS}"),
            ));
        }

        if !delay_in_range(self.max_backoff_secs) {
            errors.push(invalid(
                "collector.max_backoff_secs",
                format!("must be between 0 and {MAX_DELAY_SECS}"),
            ));
        } else if self.max_backoff_secs < self.backoff_secs {
            errors.push(invalid(
                "collector.max_backoff_secs",
                "must be at least collector.backoff_secs",
            ));
        }

        if !delay_in_range(self.min_call_interval_secs) {
            errors.push(invalid(
                "collector.min_call_interval_secs",
                format!("must be between 0 and {MAX_DELAY_SECS}"),
            ));
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            errors.push(invalid(
                "collector.page_size",
                format!("must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }

        if self.ordering_strategies.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "collector.ordering_strategies".into(),
            });
        } else {
            let mut seen = HashSet::new();
            for tag in &self.ordering_strategies {
                if !seen.insert(tag.as_str()) {
                    errors.push(ValidationError::Conflict {
                        reason: format!("Ordering strategy '{tag}' is listed more than once"),
                    });
                }
            }
        }

        if self.max_concurrency == 0 {
            errors.push(invalid("collector.max_concurrency", "must be greater than 0"));
        }

        if self.call_timeout_secs == 0 || self.call_timeout_secs > MAX_TIMEOUT_SECS {
            errors.push(invalid(
                "collector.call_timeout_secs",
                format!("must be between 1 and {MAX_TIMEOUT_SECS}"),
            ));
        }

        if let Some(secs) = self.run_timeout_secs {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                errors.push(invalid(
                    "collector.run_timeout_secs",
                    format!("must be between 1 and {MAX_TIMEOUT_SECS} when set"),
                ));
            }
        }

        if self.lang.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "collector.lang".into(),
            });
        }

        if self.country.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "collector.country".into(),
            });
        }

        collapse(errors)
    }
}

impl Validate for QualityConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.max_acceptable_missing_pct.is_finite()
            || !(0.0..=100.0).contains(&self.max_acceptable_missing_pct)
        {
            return Err(invalid(
                "quality.max_acceptable_missing_pct",
                "must be a percentage between 0 and 100",
            ));
        }

        Ok(())
    }
}

impl Validate for StorageConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("storage.reviews_file", &self.reviews_file),
            ("storage.app_info_file", &self.app_info_file),
            ("storage.metrics_file", &self.metrics_file),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: field.into(),
                });
            }
        }

        if self.reviews_file == self.app_info_file {
            errors.push(ValidationError::Conflict {
                reason: "storage.reviews_file and storage.app_info_file must differ".into(),
            });
        }

        collapse(errors)
    }
}

impl Validate for EntityConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "entities[].id".into(),
            });
        }

        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: format!("entities[{}].name", self.id),
            });
        }

        if self.candidates.is_empty() {
            return Err(ValidationError::MissingField {
                field: format!("entities[{}].candidates", self.id),
            });
        }

        if self.candidates.iter().any(|c| c.trim().is_empty()) {
            return Err(invalid(
                format!("entities[{}].candidates", self.id),
                "candidate identifiers must not be blank",
            ));
        }

        Ok(())
    }
}
