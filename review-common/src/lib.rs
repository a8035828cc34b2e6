//! Review Common - shared configuration, validation, errors, and logging for
//! the review collector.
//!
//! This crate provides:
//! - Configuration types and modular loading
//! - Configuration validation (fatal on error)
//! - Error types and handling utilities
//! - Logging setup and span helpers
//! - Small utility functions

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod config_loader;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    BackoffKind, CollectorConfig, Config, EntityConfig, ObservabilityConfig, QualityConfig,
    StorageConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
