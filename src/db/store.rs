//! Persistence seam for riders and analysis jobs.
//!
//! Every mutating method is a single atomic read-modify-write: the store locks
//! the affected rows, hands the current values to the caller's edit closure,
//! and writes back whatever the closure returns before releasing the lock.
//! Preconditions are therefore always evaluated against the locked state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::audit::{NewAuditEntry, SealAuditEntry};
use crate::models::job::{AnalysisJob, NewJob};
use crate::models::rider::{NewRider, Rider};

/// New values for a locked rider, plus the audit entry to append with them.
#[derive(Debug, Clone)]
pub struct RiderUpdate {
    pub rider: Rider,
    pub audit: Option<NewAuditEntry>,
}

/// Edit closure for a locked rider. Receives the rider and, when requested,
/// a related rider locked in the same transaction. `Ok(None)` leaves the row
/// untouched.
pub type RiderEdit<'a> =
    dyn Fn(&Rider, Option<&Rider>) -> Result<Option<RiderUpdate>> + Send + Sync + 'a;

/// Edit closure for a locked job. `Ok(None)` leaves the row untouched.
pub type JobEdit<'a> = dyn Fn(&AnalysisJob) -> Result<Option<AnalysisJob>> + Send + Sync + 'a;

/// Result of an atomic edit.
#[derive(Debug, Clone)]
pub struct Edited<T> {
    pub value: T,
    pub changed: bool,
}

#[async_trait]
pub trait RiderStore: Send + Sync {
    async fn insert_rider(&self, new: NewRider) -> Result<Rider>;

    async fn rider_by_id(&self, id: i64) -> Result<Option<Rider>>;

    async fn rider_by_token(&self, token: Uuid) -> Result<Option<Rider>>;

    /// Ids of riders whose current content has this hash, ascending.
    async fn rider_ids_with_content_hash(&self, content_hash: &str) -> Result<Vec<i64>>;

    /// Lock rider `id` (and `related`, if any, in id order) and apply `edit`.
    /// Fails with `NotFound` if `id` does not exist; a missing related rider
    /// is passed to the closure as `None`.
    async fn edit_rider(
        &self,
        id: i64,
        related: Option<i64>,
        edit: &RiderEdit<'_>,
    ) -> Result<Edited<Rider>>;

    async fn audit_trail(&self, rider_id: i64) -> Result<Vec<SealAuditEntry>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert `new` unless a queued or running job already holds its dedup
    /// key. Returns `(created, job)`; when not created, `job` is the active
    /// job that holds the key.
    async fn enqueue_if_absent(&self, new: NewJob) -> Result<(bool, AnalysisJob)>;

    async fn job_by_uid(&self, job_uid: &str) -> Result<Option<AnalysisJob>>;

    async fn active_job_for_key(&self, dedup_key: &str) -> Result<Option<AnalysisJob>>;

    async fn latest_job_for_rider(&self, rider_id: i64) -> Result<Option<AnalysisJob>>;

    /// Lock job `job_uid` and apply `edit`. Fails with `NotFound` if missing.
    async fn edit_job(&self, job_uid: &str, edit: &JobEdit<'_>) -> Result<Edited<AnalysisJob>>;

    /// Move the oldest queued job to running, skipping rows locked by other
    /// claimers.
    async fn claim_next_queued(&self, now: DateTime<Utc>) -> Result<Option<AnalysisJob>>;

    async fn queued_count(&self) -> Result<i64>;
}

/// Everything the services need from storage.
pub trait Store: RiderStore + JobStore {}

impl<T: RiderStore + JobStore + ?Sized> Store for T {}
