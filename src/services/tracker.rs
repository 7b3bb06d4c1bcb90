//! Analysis job lifecycle: `queued → running → success | error`, plus the
//! administrative `queued → error` cancellation.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;

use crate::db::store::{JobEdit, JobStore, Store};
use crate::error::{Error, Result};
use crate::models::actor::Actor;
use crate::models::job::{AnalysisJob, JobStatus};
use crate::services::promotion::{self, PromotionOutcome, RiderPromotion};
use crate::services::retry::with_transaction_retry;

/// Log lines kept per job; further lines are dropped.
pub const MAX_LOG_LINES: usize = 500;

pub const CANCELLED_MESSAGE: &str = "cancelled by administrator";

/// Calls to `complete` made by `complete_with_retry` before giving up.
pub const COMPLETION_ATTEMPTS: u32 = 5;

const COMPLETION_BACKOFF_MS: u64 = 200;

/// Progress report from the worker.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub percent: Option<i16>,
    pub stage: Option<String>,
    pub log_line: Option<String>,
}

impl ProgressUpdate {
    pub fn stage(percent: i16, stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self {
            percent: Some(percent),
            log_line: Some(stage.clone()),
            stage: Some(stage),
        }
    }
}

/// Successful analysis result.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub score: i16,
    pub summary: Option<String>,
    pub result: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub job: AnalysisJob,
    /// One entry per rider holding the analyzed content.
    pub promotions: Vec<RiderPromotion>,
}

impl Completion {
    /// Outcome for the rider the job was started for.
    pub fn promotion(&self) -> PromotionOutcome {
        self.promotions
            .iter()
            .find(|p| Some(p.rider_id) == self.job.rider_id)
            .map_or(PromotionOutcome::Unchanged, |p| p.outcome)
    }
}

fn not_running(job: &AnalysisJob, action: &str) -> Error {
    Error::PreconditionFailed(format!(
        "cannot {action} job {}: it is {}",
        job.job_uid, job.status
    ))
}

pub fn plan_claim(job: &AnalysisJob, now: DateTime<Utc>) -> Result<Option<AnalysisJob>> {
    if job.status != JobStatus::Queued {
        return Err(not_running(job, "claim"));
    }
    let mut next = job.clone();
    next.status = JobStatus::Running;
    next.started_at = Some(now);
    next.last_progress_at = Some(now);
    Ok(Some(next))
}

pub fn plan_progress(
    job: &AnalysisJob,
    update: &ProgressUpdate,
    now: DateTime<Utc>,
) -> Result<Option<AnalysisJob>> {
    if job.status != JobStatus::Running {
        return Err(not_running(job, "report progress on"));
    }
    let mut next = job.clone();
    if let Some(percent) = update.percent {
        next.progress_percent = percent.clamp(0, 100).max(job.progress_percent);
    }
    if let Some(stage) = &update.stage {
        next.stage_label = Some(stage.clone());
    }
    if let Some(line) = &update.log_line {
        if next.log_lines.len() < MAX_LOG_LINES {
            next.log_lines.push(line.clone());
        }
    }
    next.last_progress_at = Some(now);
    Ok(Some(next))
}

pub fn plan_complete(
    job: &AnalysisJob,
    outcome: &JobOutcome,
    now: DateTime<Utc>,
) -> Result<Option<AnalysisJob>> {
    match job.status {
        JobStatus::Running => {}
        // A repeated completion notification for the same job
        JobStatus::Success => return Ok(None),
        _ => return Err(not_running(job, "complete")),
    }
    if !(0..=100).contains(&outcome.score) {
        return Err(Error::Validation(format!(
            "score must be within 0..=100, got {}",
            outcome.score
        )));
    }
    let mut next = job.clone();
    next.status = JobStatus::Success;
    next.score = Some(outcome.score);
    next.summary = outcome.summary.clone();
    next.result = outcome.result.clone();
    next.progress_percent = 100;
    next.stage_label = Some("done".to_string());
    next.finished_at = Some(now);
    next.last_progress_at = Some(now);
    Ok(Some(next))
}

pub fn plan_fail(job: &AnalysisJob, message: &str, now: DateTime<Utc>) -> Result<Option<AnalysisJob>> {
    match job.status {
        JobStatus::Running => {}
        JobStatus::Error => return Ok(None),
        _ => return Err(not_running(job, "fail")),
    }
    let mut next = job.clone();
    next.status = JobStatus::Error;
    next.error_message = Some(message.to_string());
    next.finished_at = Some(now);
    Ok(Some(next))
}

pub fn plan_cancel(job: &AnalysisJob, now: DateTime<Utc>) -> Result<Option<AnalysisJob>> {
    if job.status != JobStatus::Queued {
        return Err(Error::PreconditionFailed(format!(
            "only queued jobs can be cancelled, job {} is {}",
            job.job_uid, job.status
        )));
    }
    let mut next = job.clone();
    next.status = JobStatus::Error;
    next.error_message = Some(CANCELLED_MESSAGE.to_string());
    next.finished_at = Some(now);
    Ok(Some(next))
}

/// A running job with no progress for longer than `threshold`. Advisory only.
pub fn is_stale(job: &AnalysisJob, now: DateTime<Utc>, threshold: Duration) -> bool {
    if job.status != JobStatus::Running {
        return false;
    }
    match job.last_progress_at.or(job.started_at) {
        Some(seen) => now - seen > threshold,
        None => false,
    }
}

async fn edit_with_retry<S: JobStore + ?Sized>(
    store: &S,
    label: &str,
    job_uid: &str,
    edit: &JobEdit<'_>,
) -> Result<(AnalysisJob, bool)> {
    let edited = with_transaction_retry(label, || async move { store.edit_job(job_uid, edit).await })
        .await?;
    Ok((edited.value, edited.changed))
}

/// Worker picks up a specific queued job.
pub async fn claim<S: JobStore + ?Sized>(store: &S, job_uid: &str) -> Result<AnalysisJob> {
    let (job, _) = edit_with_retry(store, "job_claim", job_uid, &|job: &AnalysisJob| {
        plan_claim(job, Utc::now())
    })
    .await?;
    tracing::info!(job_uid = %job.job_uid, rider_id = ?job.rider_id, "Analysis job claimed");
    Ok(job)
}

/// Worker picks up the oldest queued job, if any.
pub async fn claim_next<S: JobStore + ?Sized>(store: &S) -> Result<Option<AnalysisJob>> {
    let job = store.claim_next_queued(Utc::now()).await?;
    if let Some(job) = &job {
        tracing::info!(job_uid = %job.job_uid, rider_id = ?job.rider_id, "Analysis job claimed from backlog");
    }
    Ok(job)
}

pub async fn record_progress<S: JobStore + ?Sized>(
    store: &S,
    job_uid: &str,
    update: &ProgressUpdate,
) -> Result<AnalysisJob> {
    let (job, _) = edit_with_retry(store, "job_progress", job_uid, &|job: &AnalysisJob| {
        plan_progress(job, update, Utc::now())
    })
    .await?;
    tracing::debug!(
        job_uid = %job.job_uid,
        percent = job.progress_percent,
        stage = ?job.stage_label,
        "Analysis progress"
    );
    Ok(job)
}

/// Record success and run the auto-promotion rule for every rider holding
/// the analyzed content.
pub async fn complete<S: Store + ?Sized>(
    store: &S,
    job_uid: &str,
    outcome: &JobOutcome,
) -> Result<Completion> {
    let (job, changed) = edit_with_retry(store, "job_complete", job_uid, &|job: &AnalysisJob| {
        plan_complete(job, outcome, Utc::now())
    })
    .await?;

    if changed {
        record_finished(&job, "success");
        tracing::info!(
            job_uid = %job.job_uid,
            rider_id = ?job.rider_id,
            score = outcome.score,
            "Analysis job succeeded"
        );
    }

    let promotions = promotion::apply(store, &job).await?;
    Ok(Completion { job, promotions })
}

/// `complete`, called again while it fails with a retryable error. The job
/// row may already be `success` when promotion is what failed; the repeat
/// call leaves the job alone and re-runs promotion.
pub async fn complete_with_retry<S: Store + ?Sized>(
    store: &S,
    job_uid: &str,
    outcome: &JobOutcome,
) -> Result<Completion> {
    let mut attempt = 1;
    loop {
        match complete(store, job_uid, outcome).await {
            Err(e) if e.is_retryable() && attempt < COMPLETION_ATTEMPTS => {
                tracing::warn!(
                    job_uid = %job_uid,
                    attempt = attempt,
                    error = %e,
                    "Recording job result failed, retrying"
                );
                let backoff = StdDuration::from_millis(COMPLETION_BACKOFF_MS * attempt as u64);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Record a terminal worker failure. Never retried here; callers enqueue a
/// new job instead.
pub async fn fail<S: JobStore + ?Sized>(store: &S, job_uid: &str, message: &str) -> Result<AnalysisJob> {
    let (job, changed) = edit_with_retry(store, "job_fail", job_uid, &|job: &AnalysisJob| {
        plan_fail(job, message, Utc::now())
    })
    .await?;

    if changed {
        record_finished(&job, "error");
        tracing::warn!(job_uid = %job.job_uid, error = %message, "Analysis job failed");
    }
    Ok(job)
}

/// Administrative cancellation of a job that has not started.
pub async fn cancel<S: JobStore + ?Sized>(store: &S, actor: &Actor, job_uid: &str) -> Result<AnalysisJob> {
    if !actor.is_privileged() {
        return Err(Error::Forbidden("only administrators can cancel jobs".to_string()));
    }
    let (job, _) = edit_with_retry(store, "job_cancel", job_uid, &|job: &AnalysisJob| {
        plan_cancel(job, Utc::now())
    })
    .await?;

    metrics::counter!("analysis_jobs_finished_total", "outcome" => "cancelled").increment(1);
    tracing::info!(job_uid = %job.job_uid, actor_id = ?actor.id, "Analysis job cancelled");
    Ok(job)
}

fn record_finished(job: &AnalysisJob, outcome: &'static str) {
    metrics::counter!("analysis_jobs_finished_total", "outcome" => outcome).increment(1);
    if let (Some(started), Some(finished)) = (job.started_at, job.finished_at) {
        let seconds = (finished - started).num_milliseconds() as f64 / 1000.0;
        metrics::histogram!("analysis_job_seconds").record(seconds);
    }
}
