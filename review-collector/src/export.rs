//! Run artifacts: review CSV (plus timestamped backup), app info CSV, and
//! the quality metrics JSON.

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use review_common::error::{Error, ResultExt};
use review_common::{Result, StorageConfig};

use crate::collector::CollectionRun;
use crate::model::CollectionResult;

/// One row of the review export. Column order is fixed.
#[derive(Debug, Serialize)]
struct ReviewRow<'a> {
    record_id: &'a str,
    text: &'a str,
    rating: u8,
    /// ISO-8601 date
    timestamp: String,
    upvotes: u64,
    reply_text: &'a str,
    entity_id: &'a str,
    entity_name: &'a str,
    source_tag: &'a str,
}

/// One row of the app info export.
#[derive(Debug, Serialize)]
struct AppInfoRow<'a> {
    entity_id: &'a str,
    entity_name: &'a str,
    identifier: &'a str,
    title: &'a str,
    score: Option<f64>,
    ratings: Option<u64>,
    installs: Option<&'a str>,
}

/// Paths written by [`export_run`].
#[derive(Debug, Clone, Default)]
pub struct ExportedFiles {
    pub reviews: PathBuf,
    pub backup: Option<PathBuf>,
    pub app_info: PathBuf,
    pub metrics: PathBuf,
}

fn csv_error(e: csv::Error) -> Error {
    Error::Io(std::io::Error::from(e))
}

/// Write the review export for every entity in `results`.
pub fn write_reviews(path: &Path, results: &[CollectionResult]) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(csv_error)
        .context(format!("creating {}", path.display()))?;

    let mut rows = 0;
    for result in results {
        for record in &result.records {
            writer
                .serialize(ReviewRow {
                    record_id: &record.record_id,
                    text: &record.text,
                    rating: record.rating,
                    timestamp: record.timestamp.format("%Y-%m-%d").to_string(),
                    upvotes: record.upvotes,
                    reply_text: record.reply_text.as_deref().unwrap_or(""),
                    entity_id: &record.entity_id,
                    entity_name: &result.entity_name,
                    source_tag: &record.source_tag,
                })
                .map_err(csv_error)
                .context(format!("writing {}", path.display()))?;
            rows += 1;
        }
    }

    writer
        .flush()
        .context(format!("flushing {}", path.display()))?;
    Ok(rows)
}

/// Write listing metadata for every resolved entity.
pub fn write_app_info(path: &Path, results: &[CollectionResult]) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(csv_error)
        .context(format!("creating {}", path.display()))?;

    let mut rows = 0;
    for result in results {
        let Some(resolved) = &result.resolved else {
            continue;
        };
        writer
            .serialize(AppInfoRow {
                entity_id: &result.entity_id,
                entity_name: &result.entity_name,
                identifier: &resolved.identifier,
                title: &resolved.metadata.title,
                score: resolved.metadata.score,
                ratings: resolved.metadata.ratings,
                installs: resolved.metadata.installs.as_deref(),
            })
            .map_err(csv_error)
            .context(format!("writing {}", path.display()))?;
        rows += 1;
    }

    writer
        .flush()
        .context(format!("flushing {}", path.display()))?;
    Ok(rows)
}

/// Write the metrics artifact as pretty JSON.
pub fn write_metrics(path: &Path, run: &CollectionRun) -> Result<()> {
    let json = serde_json::to_string_pretty(&run.metrics())
        .map_err(|e| Error::InvalidInput(format!("serializing metrics: {e}")))?;
    fs::write(path, json).context(format!("writing {}", path.display()))
}

/// Persist every artifact of a run under `storage.output_dir`.
pub fn export_run(run: &CollectionRun, storage: &StorageConfig) -> Result<ExportedFiles> {
    fs::create_dir_all(&storage.output_dir)
        .context(format!("creating {}", storage.output_dir.display()))?;

    let reviews = storage.reviews_path();
    let rows = write_reviews(&reviews, &run.results)?;

    let backup = if storage.backup {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let path = storage.backup_path(&stamp);
        fs::copy(&reviews, &path).context(format!("writing backup {}", path.display()))?;
        Some(path)
    } else {
        None
    };

    let app_info = storage.app_info_path();
    write_app_info(&app_info, &run.results)?;

    let metrics = storage.metrics_path();
    write_metrics(&metrics, run)?;

    info!(
        rows,
        reviews = %reviews.display(),
        backup = ?backup,
        metrics = %metrics.display(),
        "Exported run artifacts"
    );

    Ok(ExportedFiles {
        reviews,
        backup,
        app_info,
        metrics,
    })
}
