use std::time::Duration;

use anyhow::{Result, bail};
use tracing::info;

use super::build_seed_jobs;
use crate::archive::RunArchive;
use crate::cli::RunArgs;
use crate::pipeline::{PipelineConfig, run_pipeline};
use crate::semantic::{DEFAULT_EMBEDDING_DIM, resolve_model_config};

pub async fn run(args: RunArgs) -> Result<()> {
    if args.batch_size == 0 {
        bail!("--batch-size must be greater than zero");
    }

    let jobs = build_seed_jobs(&args.sources)?;
    let config = PipelineConfig {
        db_path: args.db_path,
        archive: RunArchive::new(args.archive_root, args.bucket),
        model: resolve_model_config(&args.model_id, DEFAULT_EMBEDDING_DIM),
        batch_size: args.batch_size,
        seed_timeout: Duration::from_secs(args.sources.seed_timeout_secs),
        retries: args.retries,
        retry_delay: Duration::from_secs(args.retry_delay_secs),
    };

    let outcome = run_pipeline(jobs, &config).await;
    let report = &outcome.metadata.report;
    if let Some(stored) = &outcome.archived {
        info!(key = %stored.key, path = %stored.path.display(), "run metadata archived");
    }

    if !outcome.succeeded() {
        bail!(
            "pipeline run {} failed after {} attempt(s): {}",
            report.flow_run_id,
            report.reconcile_attempts,
            report.failure_reason.as_deref().unwrap_or("unknown failure")
        );
    }

    info!(
        scraped = report.listings_scraped,
        enriched = report.listings_enriched,
        inserted = report.inserted,
        updated = report.updated,
        failed_seeds = report.failed_seeds,
        "run completed"
    );
    Ok(())
}
