//! Modular configuration loader.
//!
//! Supports loading configuration from multiple files:
//! - `config.json` - Core configuration
//! - `collector.json` - Collection engine settings
//! - `quality.json` - Quality gate thresholds
//! - `entities.json` - Tracked entities and their candidate identifiers
//!
//! Files are loaded from `~/.review-collector/` (or an explicit directory)
//! and merged on top of `config.json`.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::config_dir;

/// Configuration file names
pub const CONFIG_FILES: &[&str] = &[
    "config.json",
    "collector.json",
    "quality.json",
    "entities.json",
];

/// Load a JSON file and return its contents as a Value.
/// Returns None if file doesn't exist.
fn load_json_file(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(Some(value))
}

/// Deep merge two JSON values.
/// Source values override target values, with object merging at each level.
fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => {
                        merge_json(target_value, source_value);
                    }
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

/// Merge `section` into the root object under `key`.
fn merge_section(config: &mut Value, key: &str, section: Value) {
    if let Some(config_obj) = config.as_object_mut() {
        match config_obj.get_mut(key) {
            Some(existing) => merge_json(existing, section),
            None => {
                config_obj.insert(key.to_string(), section);
            }
        }
    }
}

/// Load modular configuration from the config directory.
///
/// Priority (lowest to highest):
/// 1. config.json
/// 2. Modular files (collector.json, quality.json, entities.json)
/// 3. Environment variables (applied separately)
///
/// `entities.json` may be either a bare array or an object with an
/// `entities` array. It replaces any entity list from `config.json`: one
/// canonical candidate list per entity.
pub fn load_modular_config(dir: Option<PathBuf>) -> Result<Value> {
    let cfg_dir = dir.unwrap_or_else(config_dir);

    let config_path = cfg_dir.join("config.json");
    let mut config = load_json_file(&config_path)?.unwrap_or(Value::Object(Default::default()));

    tracing::debug!("Loading modular config from {}", cfg_dir.display());

    for section in ["collector", "quality"] {
        if let Some(value) = load_json_file(&cfg_dir.join(format!("{section}.json")))? {
            merge_section(&mut config, section, value);
            tracing::debug!("Loaded {section}.json");
        }
    }

    if let Some(entities) = load_json_file(&cfg_dir.join("entities.json"))? {
        let list = match entities {
            Value::Object(mut obj) => obj.remove("entities").unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        if let Some(config_obj) = config.as_object_mut() {
            config_obj.insert("entities".to_string(), list);
        }
        tracing::debug!("Loaded entities.json");
    }

    Ok(config)
}

/// Check which modular config files exist.
pub fn check_modular_files(dir: Option<PathBuf>) -> Vec<(String, bool)> {
    let cfg_dir = dir.unwrap_or_else(config_dir);

    CONFIG_FILES
        .iter()
        .map(|file| {
            let path = cfg_dir.join(file);
            (file.to_string(), path.exists())
        })
        .collect()
}
