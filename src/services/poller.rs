//! Server half of the progress poller. Stateless per call: everything a
//! client needs to resume is derivable from the rider token or the job handle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::store::{JobStore, RiderStore, Store};
use crate::error::{Error, Result};
use crate::models::actor::Actor;
use crate::models::job::{is_job_uid, AnalysisJob, JobStatus};
use crate::models::rider::Rider;
use crate::services::enqueue::{self, EnqueueRequest};
use crate::services::tracker;

/// Path of the poll endpoint for a job handle.
pub fn poll_path(job_uid: &str) -> String {
    format!("/api/v1/analysis/jobs/{job_uid}")
}

/// Coarse progress phase. Ordered: a phase never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    Pending,
    Running,
    Done,
}

impl From<JobStatus> for PollPhase {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => PollPhase::Pending,
            JobStatus::Running => PollPhase::Running,
            JobStatus::Success | JobStatus::Error => PollPhase::Done,
        }
    }
}

/// Handle returned by start/attach and resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Opaque job handle.
    pub job: String,
    pub poll_url: String,
    pub started_at_epoch_ms: i64,
    pub status: JobStatus,
    /// `false` when an already active job was attached to.
    pub created: bool,
}

impl Attachment {
    pub fn from_job(job: &AnalysisJob, created: bool) -> Self {
        Self {
            job: job.job_uid.clone(),
            poll_url: poll_path(&job.job_uid),
            started_at_epoch_ms: job.started_at.unwrap_or(job.created_at).timestamp_millis(),
            status: job.status,
            created,
        }
    }
}

/// One poll result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub job: String,
    pub phase: PollPhase,
    pub status: Option<JobStatus>,
    pub percent: i16,
    pub stage_label: Option<String>,
    /// Log lines from `log_offset` onwards.
    pub log_lines: Vec<String>,
    pub log_offset: usize,
    pub log_total: usize,
    pub score: Option<i16>,
    pub summary: Option<String>,
    pub error: Option<String>,
    /// Running without progress for longer than the advisory threshold.
    pub stale: bool,
    /// The job is no longer tracked; stop polling.
    pub gone: bool,
}

impl PollSnapshot {
    pub fn gone(job_uid: &str) -> Self {
        Self {
            job: job_uid.to_string(),
            phase: PollPhase::Done,
            status: None,
            percent: 0,
            stage_label: None,
            log_lines: Vec::new(),
            log_offset: 0,
            log_total: 0,
            score: None,
            summary: None,
            error: None,
            stale: false,
            gone: true,
        }
    }

    pub fn of(job: &AnalysisJob, since: usize, now: DateTime<Utc>, stale_after: Duration) -> Self {
        let log_offset = since.min(job.log_lines.len());
        Self {
            job: job.job_uid.clone(),
            phase: job.status.into(),
            status: Some(job.status),
            percent: job.progress_percent,
            stage_label: job.stage_label.clone(),
            log_lines: job.log_lines[log_offset..].to_vec(),
            log_offset,
            log_total: job.log_lines.len(),
            score: job.score,
            summary: job.summary.clone(),
            error: job.error_message.clone(),
            stale: tracker::is_stale(job, now, stale_after),
            gone: false,
        }
    }
}

async fn rider_for_token<S: RiderStore + ?Sized>(store: &S, token: Uuid) -> Result<Rider> {
    store
        .rider_by_token(token)
        .await?
        .ok_or_else(|| Error::NotFound(format!("rider {token}")))
}

/// Attach to the rider's active analysis, or start one. Idempotent.
pub async fn start_or_attach<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
    rider_token: Uuid,
) -> Result<Attachment> {
    let rider = rider_for_token(store, rider_token).await?;
    if !actor.may_act_for(rider.owner_id) {
        return Err(Error::Forbidden("not the owner of this rider".to_string()));
    }
    if rider.seal_state.is_terminal() {
        return Err(Error::PreconditionFailed(
            "expired riders are not analyzed".to_string(),
        ));
    }

    let request = EnqueueRequest::for_rider(&rider).requested_by(actor.id);
    let outcome = enqueue::enqueue(store, &request).await?;
    Ok(Attachment::from_job(&outcome.job, outcome.created))
}

/// Rebuild the handle for a rider's analysis without creating anything:
/// the active job for its dedup key, else its most recent job.
pub async fn resume<S: Store + ?Sized>(store: &S, rider_token: Uuid) -> Result<Option<Attachment>> {
    let rider = rider_for_token(store, rider_token).await?;

    if let Some(key) = EnqueueRequest::for_rider(&rider).dedup_key() {
        if let Some(active) = store.active_job_for_key(&key.as_key()).await? {
            return Ok(Some(Attachment::from_job(&active, false)));
        }
    }
    let latest = store.latest_job_for_rider(rider.id).await?;
    Ok(latest.map(|job| Attachment::from_job(&job, false)))
}

/// Snapshot of a job, with log lines after `since`.
pub async fn poll<S: JobStore + ?Sized>(
    store: &S,
    job_uid: &str,
    since: usize,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<PollSnapshot> {
    if !is_job_uid(job_uid) {
        return Err(Error::Validation("malformed job handle".to_string()));
    }
    Ok(match store.job_by_uid(job_uid).await? {
        Some(job) => PollSnapshot::of(&job, since, now, stale_after),
        None => PollSnapshot::gone(job_uid),
    })
}
