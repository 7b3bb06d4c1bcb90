use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::db::store::{Edited, JobEdit, JobStore, RiderEdit, RiderStore};
use crate::error::{Error, Result};
use crate::models::actor::ActorKind;
use crate::models::audit::{NewAuditEntry, SealAuditEntry};
use crate::models::job::{AnalysisJob, JobMetadata, JobStatus, NewJob};
use crate::models::rider::{NewRider, Rider, SealState};

const RIDER_COLUMNS: &str = "id, token, owner_id, content_hash, byte_size, content_key, seal_state, \
     superseded_by, last_score, manual_review_requested, uploaded_at, published_at, expired_at, \
     manual_requested_at, updated_at";

const JOB_COLUMNS: &str = "id, job_uid, rider_id, dedup_key, content_hash, status, source_name, \
     source_id, requested_by, content_key, progress_percent, stage_label, log_lines, score, \
     summary, result, error_message, created_at, started_at, finished_at, last_progress_at";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_seal_state(raw: &str) -> Result<SealState> {
    raw.parse()
        .map_err(|_| Error::Internal(format!("unknown seal state in database: {raw}")))
}

fn parse_job_status(raw: &str) -> Result<JobStatus> {
    raw.parse()
        .map_err(|_| Error::Internal(format!("unknown job status in database: {raw}")))
}

fn rider_from_row(r: &PgRow) -> Result<Rider> {
    let state: String = r.try_get("seal_state")?;
    Ok(Rider {
        id: r.try_get("id")?,
        token: r.try_get("token")?,
        owner_id: r.try_get("owner_id")?,
        content_hash: r.try_get("content_hash")?,
        byte_size: r.try_get("byte_size")?,
        content_key: r.try_get("content_key")?,
        seal_state: parse_seal_state(&state)?,
        superseded_by: r.try_get("superseded_by")?,
        last_score: r.try_get("last_score")?,
        manual_review_requested: r.try_get("manual_review_requested")?,
        uploaded_at: r.try_get("uploaded_at")?,
        published_at: r.try_get("published_at")?,
        expired_at: r.try_get("expired_at")?,
        manual_requested_at: r.try_get("manual_requested_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn job_from_row(r: &PgRow) -> Result<AnalysisJob> {
    let status: String = r.try_get("status")?;
    let log_lines: Json<Vec<String>> = r.try_get("log_lines")?;
    Ok(AnalysisJob {
        id: r.try_get("id")?,
        job_uid: r.try_get("job_uid")?,
        rider_id: r.try_get("rider_id")?,
        dedup_key: r.try_get("dedup_key")?,
        content_hash: r.try_get("content_hash")?,
        status: parse_job_status(&status)?,
        metadata: JobMetadata {
            source_name: r.try_get("source_name")?,
            source_id: r.try_get("source_id")?,
            requested_by: r.try_get("requested_by")?,
            content_key: r.try_get("content_key")?,
        },
        progress_percent: r.try_get("progress_percent")?,
        stage_label: r.try_get("stage_label")?,
        log_lines: log_lines.0,
        score: r.try_get("score")?,
        summary: r.try_get("summary")?,
        result: r.try_get("result")?,
        error_message: r.try_get("error_message")?,
        created_at: r.try_get("created_at")?,
        started_at: r.try_get("started_at")?,
        finished_at: r.try_get("finished_at")?,
        last_progress_at: r.try_get("last_progress_at")?,
    })
}

fn audit_from_row(r: &PgRow) -> Result<SealAuditEntry> {
    let kind: String = r.try_get("actor_kind")?;
    let old_state: String = r.try_get("old_state")?;
    let new_state: String = r.try_get("new_state")?;
    Ok(SealAuditEntry {
        id: r.try_get("id")?,
        rider_id: r.try_get("rider_id")?,
        actor_id: r.try_get("actor_id")?,
        actor_kind: kind
            .parse::<ActorKind>()
            .map_err(|_| Error::Internal(format!("unknown actor kind in database: {kind}")))?,
        old_state: parse_seal_state(&old_state)?,
        new_state: parse_seal_state(&new_state)?,
        reason: r.try_get("reason")?,
        created_at: r.try_get("created_at")?,
    })
}

async fn write_rider(tx: &mut Transaction<'_, Postgres>, rider: &Rider) -> Result<Rider> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE riders
        SET content_hash = $2,
            byte_size = $3,
            content_key = $4,
            seal_state = $5,
            superseded_by = $6,
            last_score = $7,
            manual_review_requested = $8,
            published_at = $9,
            expired_at = $10,
            manual_requested_at = $11,
            updated_at = $12
        WHERE id = $1
        RETURNING {RIDER_COLUMNS}
        "#
    ))
    .bind(rider.id)
    .bind(&rider.content_hash)
    .bind(rider.byte_size)
    .bind(&rider.content_key)
    .bind(rider.seal_state.to_string())
    .bind(rider.superseded_by)
    .bind(rider.last_score)
    .bind(rider.manual_review_requested)
    .bind(rider.published_at)
    .bind(rider.expired_at)
    .bind(rider.manual_requested_at)
    .bind(rider.updated_at)
    .fetch_one(&mut **tx)
    .await?;

    rider_from_row(&row)
}

async fn append_audit(
    tx: &mut Transaction<'_, Postgres>,
    rider_id: i64,
    entry: &NewAuditEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO seal_audit (rider_id, actor_id, actor_kind, old_state, new_state, reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(rider_id)
    .bind(entry.actor_id)
    .bind(entry.actor_kind.to_string())
    .bind(entry.old_state.to_string())
    .bind(entry.new_state.to_string())
    .bind(&entry.reason)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_job(tx: &mut Transaction<'_, Postgres>, job: &AnalysisJob) -> Result<AnalysisJob> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE analysis_jobs
        SET status = $2,
            progress_percent = $3,
            stage_label = $4,
            log_lines = $5,
            score = $6,
            summary = $7,
            result = $8,
            error_message = $9,
            started_at = $10,
            finished_at = $11,
            last_progress_at = $12
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job.id)
    .bind(job.status.to_string())
    .bind(job.progress_percent)
    .bind(&job.stage_label)
    .bind(Json(&job.log_lines))
    .bind(job.score)
    .bind(&job.summary)
    .bind(&job.result)
    .bind(&job.error_message)
    .bind(job.started_at)
    .bind(job.finished_at)
    .bind(job.last_progress_at)
    .fetch_one(&mut **tx)
    .await?;

    job_from_row(&row)
}

#[async_trait]
impl RiderStore for PgStore {
    async fn insert_rider(&self, new: NewRider) -> Result<Rider> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO riders (token, owner_id, content_hash, byte_size, content_key, seal_state,
                                uploaded_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'none', $6, $6)
            RETURNING {RIDER_COLUMNS}
            "#
        ))
        .bind(new.token)
        .bind(new.owner_id)
        .bind(&new.content_hash)
        .bind(new.byte_size)
        .bind(&new.content_key)
        .bind(new.uploaded_at)
        .fetch_one(&self.pool)
        .await?;

        rider_from_row(&row)
    }

    async fn rider_by_id(&self, id: i64) -> Result<Option<Rider>> {
        let row = sqlx::query(&format!("SELECT {RIDER_COLUMNS} FROM riders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(rider_from_row).transpose()
    }

    async fn rider_by_token(&self, token: Uuid) -> Result<Option<Rider>> {
        let row = sqlx::query(&format!("SELECT {RIDER_COLUMNS} FROM riders WHERE token = $1"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(rider_from_row).transpose()
    }

    async fn rider_ids_with_content_hash(&self, content_hash: &str) -> Result<Vec<i64>> {
        let ids: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM riders WHERE content_hash = $1 ORDER BY id")
                .bind(content_hash)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn edit_rider(
        &self,
        id: i64,
        related: Option<i64>,
        edit: &RiderEdit<'_>,
    ) -> Result<Edited<Rider>> {
        let mut tx = self.pool.begin().await?;

        // Lock both rows in id order so concurrent two-rider edits cannot deadlock.
        let mut ids = vec![id];
        if let Some(rid) = related.filter(|rid| *rid != id) {
            ids.push(rid);
        }
        ids.sort_unstable();

        let rows = sqlx::query(&format!(
            "SELECT {RIDER_COLUMNS} FROM riders WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        let locked = rows.iter().map(rider_from_row).collect::<Result<Vec<_>>>()?;
        let current = locked
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::NotFound(format!("rider {id}")))?;
        let related = related.and_then(|rid| locked.iter().find(|r| r.id == rid));

        let Some(update) = edit(current, related)? else {
            tx.commit().await?;
            return Ok(Edited {
                value: current.clone(),
                changed: false,
            });
        };

        let mut rider = update.rider;
        rider.id = id;
        let written = write_rider(&mut tx, &rider).await?;
        if let Some(entry) = &update.audit {
            append_audit(&mut tx, id, entry).await?;
        }
        tx.commit().await?;

        Ok(Edited {
            value: written,
            changed: true,
        })
    }

    async fn audit_trail(&self, rider_id: i64) -> Result<Vec<SealAuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, rider_id, actor_id, actor_kind, old_state, new_state, reason, created_at
            FROM seal_audit
            WHERE rider_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(rider_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn enqueue_if_absent(&self, new: NewJob) -> Result<(bool, AnalysisJob)> {
        let mut tx = self.pool.begin().await?;

        // Serialize all enqueuers of the same key for the rest of this
        // transaction. The partial unique index on active keys backs this up.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&new.dedup_key)
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM analysis_jobs
            WHERE dedup_key = $1 AND status IN ('queued', 'running')
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE
            "#
        ))
        .bind(&new.dedup_key)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let job = job_from_row(&row)?;
            tx.commit().await?;
            return Ok((false, job));
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO analysis_jobs (job_uid, rider_id, dedup_key, content_hash, status,
                                       source_name, source_id, requested_by, content_key, created_at)
            VALUES ($1, $2, $3, $4, 'queued', $5, $6, $7, $8, $9)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&new.job_uid)
        .bind(new.rider_id)
        .bind(&new.dedup_key)
        .bind(&new.content_hash)
        .bind(&new.metadata.source_name)
        .bind(&new.metadata.source_id)
        .bind(new.metadata.requested_by)
        .bind(&new.metadata.content_key)
        .bind(new.created_at)
        .fetch_one(&mut *tx)
        .await?;

        let job = job_from_row(&row)?;
        tx.commit().await?;
        Ok((true, job))
    }

    async fn job_by_uid(&self, job_uid: &str) -> Result<Option<AnalysisJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE job_uid = $1"
        ))
        .bind(job_uid)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn active_job_for_key(&self, dedup_key: &str) -> Result<Option<AnalysisJob>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM analysis_jobs
            WHERE dedup_key = $1 AND status IN ('queued', 'running')
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn latest_job_for_rider(&self, rider_id: i64) -> Result<Option<AnalysisJob>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM analysis_jobs
            WHERE rider_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(rider_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn edit_job(&self, job_uid: &str, edit: &JobEdit<'_>) -> Result<Edited<AnalysisJob>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE job_uid = $1 FOR UPDATE"
        ))
        .bind(job_uid)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("job {job_uid}")))?;
        let current = job_from_row(&row)?;

        let Some(mut updated) = edit(&current)? else {
            tx.commit().await?;
            return Ok(Edited {
                value: current,
                changed: false,
            });
        };

        updated.id = current.id;
        let written = write_job(&mut tx, &updated).await?;
        tx.commit().await?;

        Ok(Edited {
            value: written,
            changed: true,
        })
    }

    async fn claim_next_queued(&self, now: DateTime<Utc>) -> Result<Option<AnalysisJob>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE analysis_jobs
            SET status = 'running', started_at = $1, last_progress_at = $1
            WHERE id = (
                SELECT id FROM analysis_jobs
                WHERE status = 'queued'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn queued_count(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM analysis_jobs WHERE status = 'queued'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }
}
