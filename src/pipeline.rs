use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::archive::{RunArchive, StoredObject};
use crate::model::{
    EnrichedListing, Listing, ReconcileCounts, RunMetadata, RunReport, TaskRunRecord, TaskState,
};
use crate::semantic::{EmbeddingBackend, SemanticModelConfig, enrich_listings, load_backend};
use crate::sources::ListingSource;
use crate::store::{ReconcileError, reconcile};
use crate::util::utc_compact_string;

#[derive(Clone)]
pub struct SeedJob {
    pub source: Arc<dyn ListingSource>,
    pub seed_url: String,
}

pub fn seed_jobs(source: &Arc<dyn ListingSource>, seed_urls: &[String]) -> Vec<SeedJob> {
    seed_urls
        .iter()
        .map(|seed_url| SeedJob {
            source: Arc::clone(source),
            seed_url: seed_url.clone(),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db_path: PathBuf,
    pub archive: RunArchive,
    pub model: SemanticModelConfig,
    pub batch_size: usize,
    pub seed_timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Default)]
pub struct GatherOutcome {
    pub listings: Vec<Listing>,
    pub tasks: Vec<TaskRunRecord>,
    pub failed_seeds: usize,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub metadata: RunMetadata,
    pub archived: Option<StoredObject>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.metadata.report.status == "completed"
    }
}

struct SeedResult {
    state: TaskState,
    listings: Vec<Listing>,
    started_at: DateTime<Utc>,
    elapsed: Duration,
    message: Option<String>,
}

// Adapters stop on their own at the seed deadline; this only catches one that
// never yields.
fn seed_backstop(seed_timeout: Duration) -> Duration {
    seed_timeout + seed_timeout / 4
}

pub fn new_flow_run_id() -> String {
    format!("run-{}", utc_compact_string(Utc::now()))
}

pub async fn gather_listings(
    jobs: Vec<SeedJob>,
    seed_timeout: Duration,
    flow_run_id: &str,
) -> GatherOutcome {
    let mut join_set = JoinSet::new();
    let mut task_index = HashMap::new();

    for (index, job) in jobs.iter().enumerate() {
        let source = Arc::clone(&job.source);
        let seed_url = job.seed_url.clone();
        let handle = join_set.spawn(async move {
            let started_at = Utc::now();
            let started = Instant::now();
            let deadline = tokio::time::Instant::now() + seed_timeout;
            let scrape = source.scrape(&seed_url, deadline);
            let outcome = tokio::time::timeout(seed_backstop(seed_timeout), scrape).await;
            let elapsed = started.elapsed();

            match outcome {
                Ok(listings) => SeedResult {
                    state: TaskState::Completed,
                    listings,
                    started_at,
                    elapsed,
                    message: None,
                },
                Err(_) => SeedResult {
                    state: TaskState::TimedOut,
                    listings: Vec::new(),
                    started_at,
                    elapsed,
                    message: Some(format!(
                        "seed ignored its {}s deadline and was cancelled",
                        seed_timeout.as_secs_f64()
                    )),
                },
            }
        });
        task_index.insert(handle.id(), index);
    }

    let mut results = jobs.iter().map(|_| None).collect::<Vec<Option<SeedResult>>>();
    while let Some(joined) = join_set.join_next_with_id().await {
        match joined {
            Ok((id, result)) => {
                if let Some(index) = task_index.get(&id) {
                    results[*index] = Some(result);
                }
            }
            Err(err) => {
                let Some(index) = task_index.get(&err.id()) else {
                    continue;
                };
                let job = &jobs[*index];
                error!(source = job.source.name(), seed = %job.seed_url, error = %err, "scrape task aborted");
                results[*index] = Some(SeedResult {
                    state: TaskState::Failed,
                    listings: Vec::new(),
                    started_at: Utc::now(),
                    elapsed: Duration::ZERO,
                    message: Some(err.to_string()),
                });
            }
        }
    }

    let mut outcome = GatherOutcome::default();
    for (index, (job, result)) in jobs.iter().zip(results).enumerate() {
        let Some(result) = result else {
            continue;
        };
        let source_name = job.source.name();

        match result.state {
            TaskState::Completed => info!(
                source = source_name,
                seed = %job.seed_url,
                listings = result.listings.len(),
                "seed scraped"
            ),
            TaskState::TimedOut => {
                warn!(source = source_name, seed = %job.seed_url, "seed timed out, continuing without it")
            }
            TaskState::Failed => {}
        }
        if result.state != TaskState::Completed {
            outcome.failed_seeds += 1;
        }

        outcome.tasks.push(task_record(
            flow_run_id,
            format!("scrape_{source_name}-{index}"),
            format!("scrape_{source_name}"),
            result.state,
            result.started_at,
            result.elapsed,
            vec![source_name.to_string(), job.seed_url.clone()],
            result.listings.len(),
            0,
            result.message,
        ));
        outcome.listings.extend(result.listings);
    }

    info!(
        seeds = jobs.len(),
        failed_seeds = outcome.failed_seeds,
        listings = outcome.listings.len(),
        "gathered listings"
    );
    outcome
}

pub async fn run_pipeline(jobs: Vec<SeedJob>, config: &PipelineConfig) -> PipelineOutcome {
    run_pipeline_with(jobs, config, load_backend).await
}

enum StageFailure {
    Retryable(String),
    Fatal(String),
}

impl From<ReconcileError> for StageFailure {
    fn from(err: ReconcileError) -> Self {
        if err.is_retryable() {
            Self::Retryable(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }
}

async fn run_pipeline_with<B, L>(
    jobs: Vec<SeedJob>,
    config: &PipelineConfig,
    load: L,
) -> PipelineOutcome
where
    B: EmbeddingBackend,
    L: Fn(&SemanticModelConfig) -> Result<B> + Send + Sync + 'static,
{
    let flow_run_id = new_flow_run_id();
    let started_at = Utc::now();
    info!(flow_run_id = %flow_run_id, seeds = jobs.len(), "starting pipeline");

    let gathered = gather_listings(jobs, config.seed_timeout, &flow_run_id).await;
    let mut tasks = gathered.tasks;
    let mut report = RunReport {
        flow_run_id: flow_run_id.clone(),
        started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        listings_scraped: gathered.listings.len(),
        failed_seeds: gathered.failed_seeds,
        ..RunReport::default()
    };

    let listings = gathered.listings;
    let load = Arc::new(load);
    let mut failure_reason = None;
    let max_attempts = config.retries.saturating_add(1);

    for attempt in 1..=max_attempts {
        report.reconcile_attempts = attempt;
        let retries = attempt - 1;

        let (enriched, enrich_task) = run_enrichment(
            &flow_run_id,
            listings.clone(),
            config,
            Arc::clone(&load),
            retries,
        )
        .await;
        tasks.push(enrich_task);

        let stage = match enriched {
            Ok(enriched) => {
                report.listings_enriched = enriched.len();
                report.embedding_drops = listings.len().saturating_sub(enriched.len());

                let (result, reconcile_task) =
                    run_reconciliation(&flow_run_id, enriched, config, retries).await;
                tasks.push(reconcile_task);
                result
            }
            Err(failure) => {
                report.listings_enriched = 0;
                report.embedding_drops = listings.len();
                Err(failure)
            }
        };

        match stage {
            Ok(counts) => {
                report.inserted = counts.inserted;
                report.updated = counts.updated;
                failure_reason = None;
                break;
            }
            Err(StageFailure::Retryable(reason)) => {
                warn!(attempt, max_attempts, reason = %reason, "persist stage failed");
                failure_reason = Some(reason);
            }
            Err(StageFailure::Fatal(reason)) => {
                error!(reason = %reason, "listing store unavailable, stopping");
                failure_reason = Some(reason);
                break;
            }
        }

        if attempt < max_attempts && !config.retry_delay.is_zero() {
            tokio::time::sleep(config.retry_delay).await;
        }
    }

    report.finished_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    report.status = if failure_reason.is_some() {
        "failed".to_string()
    } else {
        "completed".to_string()
    };
    report.failure_reason = failure_reason;

    let metadata = RunMetadata {
        manifest_version: 1,
        report,
        tasks,
    };

    let archived = match config.archive.put_task_metadata(Utc::now(), &metadata) {
        Ok(stored) => Some(stored),
        Err(err) => {
            error!(error = %format!("{err:#}"), "failed to archive run metadata");
            None
        }
    };

    info!(
        flow_run_id = %flow_run_id,
        status = %metadata.report.status,
        inserted = metadata.report.inserted,
        updated = metadata.report.updated,
        "pipeline finished"
    );

    PipelineOutcome { metadata, archived }
}

async fn run_enrichment<B, L>(
    flow_run_id: &str,
    listings: Vec<Listing>,
    config: &PipelineConfig,
    load: Arc<L>,
    retries: u32,
) -> (Result<Vec<EnrichedListing>, StageFailure>, TaskRunRecord)
where
    B: EmbeddingBackend,
    L: Fn(&SemanticModelConfig) -> Result<B> + Send + Sync + 'static,
{
    let model = config.model.clone();
    let batch_size = config.batch_size;
    let input = listings.len();
    let started_at = Utc::now();
    let started = Instant::now();

    let joined = tokio::task::spawn_blocking(move || {
        enrich_listings(listings, || (*load)(&model), batch_size)
    })
    .await;

    let result = match joined {
        Ok(enriched) if enriched.is_empty() && input > 0 => Err(StageFailure::Retryable(
            "embedding stage produced no records".to_string(),
        )),
        Ok(enriched) => Ok(enriched),
        Err(err) => {
            error!(error = %err, "embedding task panicked");
            Err(StageFailure::Retryable(format!("embedding task panicked: {err}")))
        }
    };

    let (state, produced, message) = match &result {
        Ok(enriched) => (TaskState::Completed, enriched.len(), None),
        Err(StageFailure::Retryable(reason) | StageFailure::Fatal(reason)) => {
            (TaskState::Failed, 0, Some(reason.clone()))
        }
    };
    let task = task_record(
        flow_run_id,
        format!("generate_embeddings-{retries}"),
        "generate_embeddings".to_string(),
        state,
        started_at,
        started.elapsed(),
        vec![config.model.model_id.clone()],
        produced,
        retries,
        message,
    );

    (result, task)
}

async fn run_reconciliation(
    flow_run_id: &str,
    enriched: Vec<EnrichedListing>,
    config: &PipelineConfig,
    retries: u32,
) -> (Result<ReconcileCounts, StageFailure>, TaskRunRecord) {
    let db_path = config.db_path.clone();
    let records = enriched.len();
    let started_at = Utc::now();
    let started = Instant::now();

    let joined = tokio::task::spawn_blocking(move || reconcile(&db_path, enriched)).await;

    let result = match joined {
        Ok(result) => result.map_err(StageFailure::from),
        Err(err) => {
            error!(error = %err, "reconciliation task panicked");
            Err(StageFailure::Retryable(format!("reconciliation task panicked: {err}")))
        }
    };

    let (state, message) = match &result {
        Ok(_) => (TaskState::Completed, None),
        Err(StageFailure::Retryable(reason) | StageFailure::Fatal(reason)) => {
            (TaskState::Failed, Some(reason.clone()))
        }
    };
    let task = task_record(
        flow_run_id,
        format!("reconcile_listings-{retries}"),
        "reconcile_listings".to_string(),
        state,
        started_at,
        started.elapsed(),
        vec![config.db_path.display().to_string()],
        records,
        retries,
        message,
    );

    (result, task)
}

#[allow(clippy::too_many_arguments)]
fn task_record(
    flow_run_id: &str,
    task_suffix: String,
    task_name: String,
    state: TaskState,
    started_at: DateTime<Utc>,
    elapsed: Duration,
    tags: Vec<String>,
    listings: usize,
    retries: u32,
    message: Option<String>,
) -> TaskRunRecord {
    let end_time = started_at
        + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());

    TaskRunRecord {
        task_run_id: format!("{flow_run_id}-{task_suffix}"),
        task_name,
        state,
        start_time: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        end_time: end_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        duration_seconds: elapsed.as_secs_f64(),
        flow_run_id: flow_run_id.to_string(),
        tags,
        listings,
        retries,
        message,
    }
}
