use chrono::Utc;

use crate::db::store::JobStore;
use crate::error::{Error, Result};
use crate::models::job::{generate_job_uid, AnalysisJob, DedupKey, JobMetadata, NewJob};
use crate::models::rider::Rider;
use crate::services::integrity;
use crate::services::retry::with_transaction_retry;

/// A request for background analysis.
#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest {
    pub rider_id: Option<i64>,
    pub content_hash: Option<String>,
    pub metadata: JobMetadata,
}

impl EnqueueRequest {
    /// Analysis of a rider's current content.
    pub fn for_rider(rider: &Rider) -> Self {
        Self {
            rider_id: Some(rider.id),
            content_hash: rider.content_hash.clone(),
            metadata: JobMetadata {
                content_key: rider.content_key.clone(),
                ..JobMetadata::default()
            },
        }
    }

    pub fn requested_by(mut self, actor_id: Option<i64>) -> Self {
        self.metadata.requested_by = actor_id;
        self
    }

    /// Pick the dedup key: content hash, then rider, then `(source, id)`.
    pub fn dedup_key(&self) -> Option<DedupKey> {
        if let Some(hash) = self.content_hash.as_deref().and_then(integrity::canonical_hash) {
            return Some(DedupKey::ContentHash(hash));
        }
        if let Some(rider_id) = self.rider_id {
            return Some(DedupKey::Rider(rider_id));
        }
        match (
            non_empty(self.metadata.source_name.as_deref()),
            non_empty(self.metadata.source_id.as_deref()),
        ) {
            (Some(name), Some(id)) => Some(DedupKey::Source {
                name: name.to_string(),
                id: id.to_string(),
            }),
            _ => None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Result of an enqueue call.
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    /// `false` when an equivalent job was already queued or running.
    pub created: bool,
    pub job: AnalysisJob,
}

/// Queue an analysis job unless an equivalent one is already active.
///
/// Safe to call repeatedly and concurrently: the store checks and inserts in
/// one transaction, so at most one queued or running job exists per key.
pub async fn enqueue<S: JobStore + ?Sized>(store: &S, request: &EnqueueRequest) -> Result<EnqueueOutcome> {
    let key = request.dedup_key().ok_or_else(|| {
        Error::Validation(
            "analysis request needs a content hash, a rider or a source reference".to_string(),
        )
    })?;
    let dedup_key = key.as_key();
    let content_hash = match &key {
        DedupKey::ContentHash(hash) => Some(hash.clone()),
        _ => None,
    };

    let (created, job) = with_transaction_retry("enqueue", || {
        let new = NewJob {
            job_uid: generate_job_uid(),
            rider_id: request.rider_id,
            dedup_key: dedup_key.clone(),
            content_hash: content_hash.clone(),
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
        };
        async move { store.enqueue_if_absent(new).await }
    })
    .await?;

    if created {
        metrics::counter!("analysis_jobs_enqueued_total").increment(1);
        tracing::info!(
            job_uid = %job.job_uid,
            dedup_key = %dedup_key,
            rider_id = ?job.rider_id,
            "Analysis job queued"
        );
    } else {
        metrics::counter!("analysis_jobs_attached_total").increment(1);
        tracing::info!(
            job_uid = %job.job_uid,
            dedup_key = %dedup_key,
            status = %job.status,
            "Analysis already active, attaching"
        );
    }

    Ok(EnqueueOutcome { created, job })
}
