use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::Error;
use crate::routes::actor::VerifiedActor;
use crate::routes::error::ApiError;
use crate::services::poller::{self, Attachment, PollSnapshot};
use crate::services::queue::QueuedJob;
use crate::services::tracker;

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    /// Log lines already seen by the caller.
    #[serde(default)]
    pub since: usize,
}

/// POST /api/v1/riders/{token}/analysis: start analysis or attach to the
/// active one. 201 when a job was created, 409 when attached.
pub async fn start_analysis(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
    VerifiedActor(actor): VerifiedActor,
) -> Result<(StatusCode, Json<Attachment>), ApiError> {
    let attachment = poller::start_or_attach(state.store.as_ref(), &actor, token).await?;

    if !attachment.created {
        return Ok((StatusCode::CONFLICT, Json(attachment)));
    }

    let handoff = QueuedJob {
        job_uid: attachment.job.clone(),
    };
    // The worker also scans the backlog, so a lost hand-off only delays the job.
    if let Err(e) = state.queue.push(&handoff).await {
        tracing::warn!(job_uid = %attachment.job, error = %e, "Queue hand-off failed");
    }
    Ok((StatusCode::CREATED, Json(attachment)))
}

/// GET /api/v1/riders/{token}/analysis: handle of the rider's active or
/// latest analysis. Never creates a job.
pub async fn resume_analysis(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> Result<Json<Attachment>, ApiError> {
    poller::resume(state.store.as_ref(), token)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("analysis for rider {token}")).into())
}

/// GET /api/v1/analysis/jobs/{job_uid}?since=N: poll snapshot.
pub async fn poll_job(
    State(state): State<AppState>,
    Path(job_uid): Path<String>,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollSnapshot>, ApiError> {
    let snapshot = poller::poll(
        state.store.as_ref(),
        &job_uid,
        query.since,
        Utc::now(),
        state.stale_after(),
    )
    .await?;
    Ok(Json(snapshot))
}

/// POST /api/v1/analysis/jobs/{job_uid}/cancel: administrative cancel of a
/// job that has not started.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_uid): Path<String>,
    VerifiedActor(actor): VerifiedActor,
) -> Result<Json<PollSnapshot>, ApiError> {
    let job = tracker::cancel(state.store.as_ref(), &actor, &job_uid).await?;
    Ok(Json(PollSnapshot::of(&job, 0, Utc::now(), state.stale_after())))
}
