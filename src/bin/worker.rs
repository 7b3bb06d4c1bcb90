use rider_seal::{
    config::AppConfig,
    db::{self, PgStore, RiderStore},
    error::Error,
    models::job::AnalysisJob,
    services::{
        analyzer::{AnalyzerClient, AnalyzerError},
        queue::{JobQueue, QueuedJob},
        storage::{R2Client, StorageError},
        tracker::{self, ProgressUpdate},
    },
};
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

struct Worker {
    store: PgStore,
    storage: R2Client,
    queue: JobQueue,
    analyzer: AnalyzerClient,
}

/// Anything that ends a claimed job in `error`.
#[derive(Debug, thiserror::Error)]
enum JobFailure {
    #[error("no stored content to analyze")]
    NoContent,

    #[error("content fetch failed: {0}")]
    Storage(#[from] StorageError),

    #[error("analyzer failed: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error(transparent)]
    Store(#[from] Error),
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting rider analysis worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let storage = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize R2 client");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");
    match queue.requeue_processing().await {
        Ok(0) => {}
        Ok(moved) => tracing::info!(moved, "Requeued hand-offs left in processing"),
        Err(e) => tracing::warn!(error = %e, "Could not requeue hand-offs left in processing"),
    }

    let analyzer = AnalyzerClient::new(config.analyzer_url.clone(), config.analyzer_token.clone())
        .expect("Failed to initialize analyzer client");

    let worker = Worker {
        store: PgStore::new(db_pool),
        storage,
        queue,
        analyzer,
    };
    let idle = Duration::from_millis(config.worker_poll_interval_ms);

    tracing::info!("Worker ready, starting job processing loop");

    loop {
        match worker.process_next_job().await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(idle).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job");
                sleep(idle).await;
            }
        }
    }
}

impl Worker {
    /// Claim and run one job: a Redis hand-off first, else the oldest queued
    /// row. Returns `Ok(false)` when there was nothing to do.
    async fn process_next_job(&self) -> Result<bool, Error> {
        let handoff = match self.queue.pop().await {
            Ok(handoff) => handoff,
            Err(e) => {
                tracing::warn!(error = %e, "Queue pop failed, scanning backlog");
                None
            }
        };

        let claimed = match &handoff {
            Some(QueuedJob { job_uid }) => match tracker::claim(&self.store, job_uid).await {
                Ok(job) => Ok(Some(job)),
                // Already claimed from the backlog, cancelled, or gone.
                Err(e @ (Error::PreconditionFailed(_) | Error::NotFound(_))) => {
                    tracing::debug!(job_uid = %job_uid, reason = %e, "Skipping hand-off");
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            None => tracker::claim_next(&self.store).await,
        };

        // The row is authoritative: a hand-off whose claim failed stays
        // queued in the database and is picked up by the backlog scan.
        if let Some(handoff) = &handoff {
            if let Err(e) = self.queue.ack(handoff).await {
                tracing::warn!(job_uid = %handoff.job_uid, error = %e, "Queue ack failed");
            }
        }

        let processed = match claimed? {
            Some(job) => {
                self.run(&job).await;
                true
            }
            None => handoff.is_some(),
        };

        if !processed {
            if let Ok(depth) = self.queue.depth().await {
                tracing::trace!(depth, "Hand-off queue depth");
            }
        }
        Ok(processed)
    }

    /// Drive a claimed job to `success` or `error`. Failures are recorded on
    /// the job and never retried.
    async fn run(&self, job: &AnalysisJob) {
        tracing::info!(job_uid = %job.job_uid, rider_id = ?job.rider_id, "Processing analysis job");

        let outcome = match self.analyze(job).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                tracing::error!(job_uid = %job.job_uid, error = %failure, "Analysis failed");
                if let Err(e) = tracker::fail(&self.store, &job.job_uid, &failure.to_string()).await {
                    tracing::error!(job_uid = %job.job_uid, error = %e, "Failed to record job failure");
                }
                return;
            }
        };

        match tracker::complete_with_retry(&self.store, &job.job_uid, &outcome).await {
            Ok(completion) => tracing::info!(
                job_uid = %job.job_uid,
                score = outcome.score,
                promotions = ?completion.promotions,
                "Job completed successfully"
            ),
            Err(e) => tracing::error!(job_uid = %job.job_uid, error = %e, "Failed to record job result"),
        }
    }

    async fn analyze(&self, job: &AnalysisJob) -> Result<tracker::JobOutcome, JobFailure> {
        self.progress(job, ProgressUpdate::stage(10, "fetching")).await?;
        let key = self.content_key(job).await?;
        let content = self.storage.get(&key).await?;

        self.progress(job, ProgressUpdate::stage(40, "analyzing")).await?;
        let start = std::time::Instant::now();
        let outcome = self
            .analyzer
            .analyze(&content, job.content_hash.as_deref())
            .await?;
        tracing::info!(
            job_uid = %job.job_uid,
            analyzer_ms = start.elapsed().as_millis() as u64,
            score = outcome.score,
            "Analyzer responded"
        );

        self.progress(job, ProgressUpdate::stage(90, "recording")).await?;
        Ok(outcome)
    }

    async fn progress(&self, job: &AnalysisJob, update: ProgressUpdate) -> Result<(), Error> {
        tracker::record_progress(&self.store, &job.job_uid, &update).await?;
        Ok(())
    }

    /// Object key recorded at enqueue time, else the rider's current one.
    async fn content_key(&self, job: &AnalysisJob) -> Result<String, JobFailure> {
        if let Some(key) = &job.metadata.content_key {
            return Ok(key.clone());
        }
        let Some(rider_id) = job.rider_id else {
            return Err(JobFailure::NoContent);
        };
        self.store
            .rider_by_id(rider_id)
            .await?
            .and_then(|rider| rider.content_key)
            .ok_or(JobFailure::NoContent)
    }
}
