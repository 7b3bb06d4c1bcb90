//! In-process store used by tests and local development.
//!
//! One async mutex guards all tables and is held for the whole of each
//! operation, so every check-then-act is serialized the same way row locks
//! serialize it in Postgres.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::store::{Edited, JobEdit, JobStore, RiderEdit, RiderStore};
use crate::error::{Error, Result};
use crate::models::audit::SealAuditEntry;
use crate::models::job::{AnalysisJob, JobStatus, NewJob};
use crate::models::rider::{NewRider, Rider, SealState};

#[derive(Default)]
struct Tables {
    riders: Vec<Rider>,
    jobs: Vec<AnalysisJob>,
    audit: Vec<SealAuditEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failures_to_inject: AtomicUsize,
    rider_failures_to_inject: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` mutating operations fail with `TransactionFailed`,
    /// as a lost serialization race would.
    pub fn inject_transaction_failures(&self, n: usize) {
        self.failures_to_inject.store(n, Ordering::SeqCst);
    }

    /// Like `inject_transaction_failures`, but only rider edits fail, so a
    /// job write can commit while the rider write that follows it does not.
    pub fn inject_rider_edit_failures(&self, n: usize) {
        self.rider_failures_to_inject.store(n, Ordering::SeqCst);
    }

    /// Snapshot of every job, in insertion order.
    pub async fn all_jobs(&self) -> Vec<AnalysisJob> {
        self.tables.lock().await.jobs.clone()
    }

    fn take_injected_failure(&self) -> Result<()> {
        Self::take_from(&self.failures_to_inject)
    }

    fn take_from(counter: &AtomicUsize) -> Result<()> {
        let taken = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(Error::TransactionFailed(
                "injected serialization failure".to_string(),
            )),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl RiderStore for MemoryStore {
    async fn insert_rider(&self, new: NewRider) -> Result<Rider> {
        let mut tables = self.tables.lock().await;
        let rider = Rider {
            id: tables.riders.len() as i64 + 1,
            token: new.token,
            owner_id: new.owner_id,
            content_hash: new.content_hash,
            byte_size: new.byte_size,
            content_key: new.content_key,
            seal_state: SealState::None,
            superseded_by: None,
            last_score: None,
            manual_review_requested: false,
            uploaded_at: new.uploaded_at,
            published_at: None,
            expired_at: None,
            manual_requested_at: None,
            updated_at: new.uploaded_at,
        };
        tables.riders.push(rider.clone());
        Ok(rider)
    }

    async fn rider_by_id(&self, id: i64) -> Result<Option<Rider>> {
        let tables = self.tables.lock().await;
        Ok(tables.riders.iter().find(|r| r.id == id).cloned())
    }

    async fn rider_by_token(&self, token: Uuid) -> Result<Option<Rider>> {
        let tables = self.tables.lock().await;
        Ok(tables.riders.iter().find(|r| r.token == token).cloned())
    }

    async fn rider_ids_with_content_hash(&self, content_hash: &str) -> Result<Vec<i64>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .riders
            .iter()
            .filter(|r| r.content_hash.as_deref() == Some(content_hash))
            .map(|r| r.id)
            .collect())
    }

    async fn edit_rider(
        &self,
        id: i64,
        related: Option<i64>,
        edit: &RiderEdit<'_>,
    ) -> Result<Edited<Rider>> {
        let mut tables = self.tables.lock().await;
        self.take_injected_failure()?;
        Self::take_from(&self.rider_failures_to_inject)?;

        let current = tables
            .riders
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("rider {id}")))?;
        let related = related.and_then(|rid| tables.riders.iter().find(|r| r.id == rid).cloned());

        let Some(update) = edit(&current, related.as_ref())? else {
            return Ok(Edited {
                value: current,
                changed: false,
            });
        };

        if let Some(entry) = update.audit {
            let audit_id = tables.audit.len() as i64 + 1;
            tables.audit.push(SealAuditEntry {
                id: audit_id,
                rider_id: id,
                actor_id: entry.actor_id,
                actor_kind: entry.actor_kind,
                old_state: entry.old_state,
                new_state: entry.new_state,
                reason: entry.reason,
                created_at: entry.created_at,
            });
        }

        let mut rider = update.rider;
        rider.id = id;
        rider.token = current.token;
        if let Some(slot) = tables.riders.iter_mut().find(|r| r.id == id) {
            *slot = rider.clone();
        }
        Ok(Edited {
            value: rider,
            changed: true,
        })
    }

    async fn audit_trail(&self, rider_id: i64) -> Result<Vec<SealAuditEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .audit
            .iter()
            .filter(|e| e.rider_id == rider_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue_if_absent(&self, new: NewJob) -> Result<(bool, AnalysisJob)> {
        let mut tables = self.tables.lock().await;
        self.take_injected_failure()?;

        if let Some(active) = tables
            .jobs
            .iter()
            .find(|j| j.dedup_key == new.dedup_key && j.status.is_active())
        {
            return Ok((false, active.clone()));
        }

        // Let other tasks run while the lock is held, as a concurrent
        // transaction would between its lookup and its insert.
        tokio::task::yield_now().await;

        let job = AnalysisJob::queued(tables.jobs.len() as i64 + 1, new);
        tables.jobs.push(job.clone());
        Ok((true, job))
    }

    async fn job_by_uid(&self, job_uid: &str) -> Result<Option<AnalysisJob>> {
        let tables = self.tables.lock().await;
        Ok(tables.jobs.iter().find(|j| j.job_uid == job_uid).cloned())
    }

    async fn active_job_for_key(&self, dedup_key: &str) -> Result<Option<AnalysisJob>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .iter()
            .find(|j| j.dedup_key == dedup_key && j.status.is_active())
            .cloned())
    }

    async fn latest_job_for_rider(&self, rider_id: i64) -> Result<Option<AnalysisJob>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .iter()
            .rev()
            .find(|j| j.rider_id == Some(rider_id))
            .cloned())
    }

    async fn edit_job(&self, job_uid: &str, edit: &JobEdit<'_>) -> Result<Edited<AnalysisJob>> {
        let mut tables = self.tables.lock().await;
        self.take_injected_failure()?;

        let slot = tables
            .jobs
            .iter_mut()
            .find(|j| j.job_uid == job_uid)
            .ok_or_else(|| Error::NotFound(format!("job {job_uid}")))?;

        match edit(slot)? {
            Some(mut updated) => {
                updated.id = slot.id;
                updated.job_uid = slot.job_uid.clone();
                *slot = updated.clone();
                Ok(Edited {
                    value: updated,
                    changed: true,
                })
            }
            None => Ok(Edited {
                value: slot.clone(),
                changed: false,
            }),
        }
    }

    async fn claim_next_queued(&self, now: DateTime<Utc>) -> Result<Option<AnalysisJob>> {
        let mut tables = self.tables.lock().await;
        let Some(job) = tables
            .jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by_key(|j| (j.created_at, j.id))
        else {
            return Ok(None);
        };
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.last_progress_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn queued_count(&self) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .count() as i64)
    }
}
