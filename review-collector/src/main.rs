//! Review Collector - collects app store reviews for the configured entities
//! and writes the review export, app info and quality metrics.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use review_collector::export::export_run;
use review_collector::{CollectionRun, Collector, PlayStoreSource, TokioClock};
use review_common::config::Config;
use review_common::logging::init_logging_with_exclusions;
use review_common::util::{parse_duration_secs, truncate_with_ellipsis};

/// Exit code when `--strict` is set and the quality gate fails.
const EXIT_QUALITY_FAILED: i32 = 2;

/// Characters of review text shown per sample.
const SAMPLE_TEXT_CHARS: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "review-collector")]
#[command(version)]
#[command(about = "Collect app store reviews with multi-strategy pagination and dedup.", long_about = None)]
struct Args {
    /// Single config file (instead of the modular config directory)
    #[arg(long, conflicts_with = "config_dir")]
    config: Option<PathBuf>,

    /// Modular config directory (default: ~/.review-collector)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Override collector.target_count_per_entity
    #[arg(long)]
    target: Option<usize>,

    /// Override storage.output_dir
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Run-level timeout, e.g. "90s", "10m"
    #[arg(long)]
    timeout: Option<String>,

    /// Skip the timestamped backup copy of the review export
    #[arg(long)]
    no_backup: bool,

    /// Sample reviews to log per entity after the run
    #[arg(long, default_value = "3")]
    samples: usize,

    /// Exit non-zero when the quality gate fails
    #[arg(long)]
    strict: bool,

    /// Override observability.log_level
    #[arg(long)]
    log_level: Option<String>,
}

/// Load configuration, then apply environment and command-line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => Config::load_and_validate(args.config_dir.as_deref())?,
    };

    if let Some(target) = args.target {
        config.collector.target_count_per_entity = target;
    }
    if let Some(dir) = &args.output_dir {
        config.storage.output_dir = dir.clone();
    }
    if let Some(timeout) = &args.timeout {
        let secs = parse_duration_secs(timeout).context("Invalid --timeout")?;
        config.collector.run_timeout_secs = Some(secs);
    }
    if args.no_backup {
        config.storage.backup = false;
    }
    if let Some(level) = &args.log_level {
        config.observability.log_level = level.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Log a few reviews per entity for a quick eyeball check.
fn display_samples(run: &CollectionRun, per_entity: usize) {
    if per_entity == 0 {
        return;
    }

    for result in &run.results {
        for record in result.records.iter().take(per_entity) {
            info!(
                entity = %result.entity_id,
                rating = record.rating,
                date = %record.timestamp.format("%Y-%m-%d"),
                upvotes = record.upvotes,
                text = %truncate_with_ellipsis(&record.text, SAMPLE_TEXT_CHARS),
                "Sample review"
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();
    let args = Args::parse();

    // Any configuration problem aborts here, before an upstream call.
    let config = load_config(&args)?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    info!("Review Collector v{}", env!("CARGO_PKG_VERSION"));

    let source = Arc::new(PlayStoreSource::new(
        config.collector.lang.as_str(),
        config.collector.country.as_str(),
    )?);
    let collector = Collector::new(&config, source, TokioClock::shared())?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight pages and stopping");
                cancel.cancel();
            }
        });
    }

    info!(
        duration_ms = startup_start.elapsed().as_millis() as u64,
        "Collector initialized"
    );

    let run = collector.run(cancel).await;
    let files = export_run(&run, &config.storage)?;

    display_samples(&run, args.samples);

    info!(
        reviews = %files.reviews.display(),
        app_info = %files.app_info.display(),
        metrics = %files.metrics.display(),
        total = run.total_records(),
        pass = run.quality.pass,
        "Done"
    );

    if args.strict && !run.quality.pass {
        warn!(
            violations = run.quality.violations.len(),
            "Quality gate failed in strict mode"
        );
        std::process::exit(EXIT_QUALITY_FAILED);
    }

    Ok(())
}
