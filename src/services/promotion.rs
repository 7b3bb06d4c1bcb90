use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::db::store::{RiderEdit, RiderStore, RiderUpdate};
use crate::error::Result;
use crate::models::actor::Actor;
use crate::models::audit::NewAuditEntry;
use crate::models::job::{AnalysisJob, JobStatus};
use crate::models::rider::{Rider, SealState};
use crate::services::retry::with_transaction_retry;

/// Scores strictly above this promote a rider to validated.
pub const AUTO_PROMOTE_THRESHOLD: i16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// Rider moved to validated.
    Promoted,
    /// Score recorded, seal left as is.
    ScoreRecorded,
    /// Nothing to do (already applied, stale content, no rider, ...).
    Unchanged,
}

/// Whether `score` clears the threshold for `rider` as it stands.
pub fn qualifies(score: i16, rider: &Rider) -> bool {
    score > AUTO_PROMOTE_THRESHOLD
        && !rider.manual_review_requested
        && rider.seal_state.is_open()
        && rider.content_hash.is_some()
}

/// Record the job's score on its rider and promote when the rule allows.
///
/// Returns `Ok(None)` when nothing changes, which makes re-application of the
/// same result a no-op. Results for content that has since been replaced are
/// ignored.
pub fn plan_promotion(
    rider: &Rider,
    job: &AnalysisJob,
    now: DateTime<Utc>,
) -> Result<Option<RiderUpdate>> {
    let (JobStatus::Success, Some(score)) = (job.status, job.score) else {
        return Ok(None);
    };
    if rider.seal_state.is_terminal() {
        return Ok(None);
    }
    if let Some(analyzed) = &job.content_hash {
        if rider.content_hash.as_ref() != Some(analyzed) {
            return Ok(None);
        }
    }

    let mut next = rider.clone();
    let mut changed = false;
    if rider.last_score != Some(score) {
        next.last_score = Some(score);
        changed = true;
    }

    let mut audit = None;
    if qualifies(score, rider) {
        next.seal_state = SealState::Validated;
        next.published_at = Some(now);
        audit = Some(NewAuditEntry::new(
            &Actor::system(),
            rider.seal_state,
            SealState::Validated,
            Some(format!("auto-promotion: job {} scored {score}", job.job_uid)),
            now,
        ));
        changed = true;
    }

    if !changed {
        return Ok(None);
    }
    next.updated_at = now;
    Ok(Some(RiderUpdate { rider: next, audit }))
}

/// What a job's result did to one rider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiderPromotion {
    pub rider_id: i64,
    pub outcome: PromotionOutcome,
}

/// Riders a result applies to: the job's own rider plus every rider whose
/// current content is the analyzed content, ascending by id.
async fn targets<S: RiderStore + ?Sized>(store: &S, job: &AnalysisJob) -> Result<Vec<i64>> {
    let mut ids = match &job.content_hash {
        Some(hash) => store.rider_ids_with_content_hash(hash).await?,
        None => Vec::new(),
    };
    ids.extend(job.rider_id);
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Apply a successful job's result to every rider holding the analyzed
/// content. Riders are edited one at a time in id order. Idempotent.
pub async fn apply<S: RiderStore + ?Sized>(
    store: &S,
    job: &AnalysisJob,
) -> Result<Vec<RiderPromotion>> {
    let mut applied = Vec::new();
    for rider_id in targets(store, job).await? {
        let outcome = apply_to_rider(store, rider_id, job).await?;
        applied.push(RiderPromotion { rider_id, outcome });
    }
    Ok(applied)
}

async fn apply_to_rider<S: RiderStore + ?Sized>(
    store: &S,
    rider_id: i64,
    job: &AnalysisJob,
) -> Result<PromotionOutcome> {
    let promoted = AtomicBool::new(false);
    let edit = |rider: &Rider, _: Option<&Rider>| -> Result<Option<RiderUpdate>> {
        let update = plan_promotion(rider, job, Utc::now())?;
        promoted.store(
            update.as_ref().is_some_and(|u| u.audit.is_some()),
            Ordering::SeqCst,
        );
        Ok(update)
    };
    let edit: &RiderEdit<'_> = &edit;

    let outcome = with_transaction_retry("auto_promotion", || async move {
        store.edit_rider(rider_id, None, edit).await
    })
    .await?;

    if !outcome.changed {
        return Ok(PromotionOutcome::Unchanged);
    }
    if promoted.load(Ordering::SeqCst) {
        metrics::counter!("auto_promotions_total").increment(1);
        metrics::counter!("seal_transitions_total", "to" => SealState::Validated.to_string())
            .increment(1);
        tracing::info!(
            rider_id = rider_id,
            job_uid = %job.job_uid,
            score = ?job.score,
            "Rider auto-promoted to validated"
        );
        Ok(PromotionOutcome::Promoted)
    } else {
        Ok(PromotionOutcome::ScoreRecorded)
    }
}
