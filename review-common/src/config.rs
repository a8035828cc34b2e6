//! Configuration management for the review collector.
//!
//! The collector reads a unified configuration file at
//! `~/.review-collector/config.json`, optionally split into modular files
//! (see [`crate::config_loader`]).
//!
//! # Configuration Priority
//!
//! 1. Command-line flags (applied by the binary)
//! 2. Environment variables (REVIEW_* prefix)
//! 3. Explicit config file values
//! 4. Default values
//!
//! # Environment Variable Mapping
//!
//! - `REVIEW_LOG_LEVEL` → observability.log_level
//! - `REVIEW_LOG_FORMAT` → observability.log_format
//! - `REVIEW_TARGET_COUNT` → collector.target_count_per_entity
//! - `REVIEW_MAX_RETRIES` → collector.max_retries
//! - `REVIEW_MIN_CALL_INTERVAL_SECS` → collector.min_call_interval_secs
//! - `REVIEW_PAGE_SIZE` → collector.page_size
//! - `REVIEW_MAX_CONCURRENCY` → collector.max_concurrency
//! - `REVIEW_LANG` → collector.lang
//! - `REVIEW_COUNTRY` → collector.country
//! - `REVIEW_OUTPUT_DIR` → storage.output_dir

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config_loader::{check_modular_files, load_modular_config};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".review-collector"),
        |dirs| dirs.home_dir().join(".review-collector"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to pin at `warn`.
    ///
    /// Built-in noisy modules (hyper, reqwest, h2, rustls, tokio_util) are
    /// always filtered; this list allows adding custom modules.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Collector Configuration
// ============================================================================

/// Backoff shape applied between retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay doubles after each failed attempt, capped at `max_backoff_secs`
    Exponential,
}

/// Settings consumed by the collection engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Coverage floor per entity. Fetching stops as soon as it is met.
    #[serde(default = "default_target_count")]
    pub target_count_per_entity: usize,

    /// Total attempts per upstream call (the first attempt included)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts in seconds
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: f64,

    /// Backoff shape
    #[serde(default)]
    pub backoff: BackoffKind,

    /// Upper bound for exponential backoff in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: f64,

    /// Minimum spacing between any two upstream calls in seconds
    #[serde(default = "default_min_call_interval_secs")]
    pub min_call_interval_secs: f64,

    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Ordering strategies, tried in this order
    #[serde(default = "default_ordering_strategies")]
    pub ordering_strategies: Vec<String>,

    /// Entities processed in parallel
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout for a single upstream attempt in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Optional wall-clock limit for the whole run in seconds
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Store language code
    #[serde(default = "default_lang")]
    pub lang: String,

    /// Store country code
    #[serde(default = "default_country")]
    pub country: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            target_count_per_entity: default_target_count(),
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
            backoff: BackoffKind::default(),
            max_backoff_secs: default_max_backoff_secs(),
            min_call_interval_secs: default_min_call_interval_secs(),
            page_size: default_page_size(),
            ordering_strategies: default_ordering_strategies(),
            max_concurrency: default_max_concurrency(),
            call_timeout_secs: default_call_timeout_secs(),
            run_timeout_secs: None,
            lang: default_lang(),
            country: default_country(),
        }
    }
}

impl CollectorConfig {
    /// Base backoff delay.
    pub fn backoff_delay(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_secs.max(0.0))
    }

    /// Exponential backoff ceiling.
    pub fn max_backoff_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_backoff_secs.max(0.0))
    }

    /// Minimum spacing between upstream calls.
    pub fn min_call_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_call_interval_secs.max(0.0))
    }

    /// Per-attempt timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Run-level timeout, if configured.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

fn default_target_count() -> usize {
    400
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_secs() -> f64 {
    5.0
}

fn default_max_backoff_secs() -> f64 {
    60.0
}

fn default_min_call_interval_secs() -> f64 {
    1.0
}

fn default_page_size() -> usize {
    100
}

fn default_ordering_strategies() -> Vec<String> {
    vec!["newest".into(), "most_relevant".into()]
}

fn default_max_concurrency() -> usize {
    2
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_lang() -> String {
    "en".into()
}

fn default_country() -> String {
    "et".into()
}

// ============================================================================
// Quality Gate Configuration
// ============================================================================

/// Thresholds for the post-collection quality gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Minimum records an entity must end with
    #[serde(default = "default_min_count")]
    pub min_acceptable_count_per_entity: usize,

    /// Maximum share of records with empty text, in percent (0-100)
    #[serde(default = "default_max_missing_pct")]
    pub max_acceptable_missing_pct: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_acceptable_count_per_entity: default_min_count(),
            max_acceptable_missing_pct: default_max_missing_pct(),
        }
    }
}

fn default_min_count() -> usize {
    400
}

fn default_max_missing_pct() -> f64 {
    5.0
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// Output locations for run artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory receiving every artifact
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Review export file name
    #[serde(default = "default_reviews_file")]
    pub reviews_file: String,

    /// App information export file name
    #[serde(default = "default_app_info_file")]
    pub app_info_file: String,

    /// Metrics artifact file name
    #[serde(default = "default_metrics_file")]
    pub metrics_file: String,

    /// Write a timestamped backup copy of the review export
    #[serde(default = "default_true")]
    pub backup: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            reviews_file: default_reviews_file(),
            app_info_file: default_app_info_file(),
            metrics_file: default_metrics_file(),
            backup: true,
        }
    }
}

impl StorageConfig {
    pub fn reviews_path(&self) -> PathBuf {
        self.output_dir.join(&self.reviews_file)
    }

    pub fn app_info_path(&self) -> PathBuf {
        self.output_dir.join(&self.app_info_file)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.output_dir.join(&self.metrics_file)
    }

    /// Backup path for the review export, e.g. `raw_reviews_20240101_120000.csv`.
    pub fn backup_path(&self, stamp: &str) -> PathBuf {
        let file = Path::new(&self.reviews_file);
        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("reviews");
        let name = match file.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}_{stamp}.{ext}"),
            None => format!("{stem}_{stamp}"),
        };
        self.output_dir.join(name)
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/raw")
}

fn default_reviews_file() -> String {
    "raw_reviews.csv".into()
}

fn default_app_info_file() -> String {
    "app_info.csv".into()
}

fn default_metrics_file() -> String {
    "quality_metrics.json".into()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Entity Configuration
// ============================================================================

/// One tracked entity and its candidate identifiers, in probe order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Stable short code (e.g. "cbe")
    pub id: String,
    /// Display name carried into the export
    pub name: String,
    /// Upstream identifiers to probe, most likely first
    #[serde(alias = "app_ids")]
    pub candidates: Vec<String>,
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

impl Config {
    /// Load configuration from the default config directory.
    pub fn load() -> Result<Self> {
        Self::load_from_dir(&config_dir())
    }

    /// Load configuration from a directory of modular files.
    ///
    /// Missing files fall back to defaults.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            tracing::info!(dir = %dir.display(), "Config directory not found, using defaults");
            return Ok(Self::default());
        }

        let present: Vec<String> = check_modular_files(Some(dir.to_path_buf()))
            .into_iter()
            .filter_map(|(file, exists)| exists.then_some(file))
            .collect();
        tracing::debug!(dir = %dir.display(), files = ?present, "Loading config");

        let value = load_modular_config(Some(dir.to_path_buf()))?;
        serde_json::from_value(value)
            .with_context(|| format!("Failed to parse config from {}", dir.display()))
    }

    /// Load configuration from a single file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("REVIEW_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("REVIEW_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        override_parsed(&lookup, "REVIEW_TARGET_COUNT", &mut self.collector.target_count_per_entity);
        override_parsed(&lookup, "REVIEW_MAX_RETRIES", &mut self.collector.max_retries);
        override_parsed(
            &lookup,
            "REVIEW_MIN_CALL_INTERVAL_SECS",
            &mut self.collector.min_call_interval_secs,
        );
        override_parsed(&lookup, "REVIEW_PAGE_SIZE", &mut self.collector.page_size);
        override_parsed(&lookup, "REVIEW_MAX_CONCURRENCY", &mut self.collector.max_concurrency);

        if let Some(lang) = lookup("REVIEW_LANG") {
            self.collector.lang = lang;
        }
        if let Some(country) = lookup("REVIEW_COUNTRY") {
            self.collector.country = country;
        }
        if let Some(dir) = lookup("REVIEW_OUTPUT_DIR") {
            self.storage.output_dir = PathBuf::from(dir);
        }
    }

    /// Look up an entity by id.
    pub fn entity(&self, id: &str) -> Option<&EntityConfig> {
        self.entities.iter().find(|e| e.id == id)
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable override"),
        }
    }
}
