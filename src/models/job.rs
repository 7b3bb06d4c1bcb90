use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Error,
}

impl JobStatus {
    /// Queued or running; at most one such job may exist per dedup key.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn is_finished(self) -> bool {
        !self.is_active()
    }
}

/// Key deciding whether two analysis requests are duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupKey {
    ContentHash(String),
    Rider(i64),
    Source { name: String, id: String },
}

impl DedupKey {
    /// Stored form of the key.
    pub fn as_key(&self) -> String {
        match self {
            DedupKey::ContentHash(hash) => format!("sha256:{hash}"),
            DedupKey::Rider(id) => format!("rider:{id}"),
            DedupKey::Source { name, id } => format!("source:{name}:{id}"),
        }
    }
}

/// Optional job metadata. Every field is nullable in the job schema, so
/// requests may carry any subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub source_name: Option<String>,
    pub source_id: Option<String>,
    pub requested_by: Option<i64>,
    pub content_key: Option<String>,
}

/// Values for inserting a queued job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_uid: String,
    pub rider_id: Option<i64>,
    pub dedup_key: String,
    pub content_hash: Option<String>,
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
}

/// Generate an opaque, practically unguessable job handle (64 hex chars).
pub fn generate_job_uid() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Whether `raw` has the shape of a job handle.
pub fn is_job_uid(raw: &str) -> bool {
    raw.len() == 64 && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// A background analysis job.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisJob {
    pub id: i64,
    pub job_uid: String,
    pub rider_id: Option<i64>,
    pub dedup_key: String,
    pub content_hash: Option<String>,
    pub status: JobStatus,
    pub metadata: JobMetadata,
    pub progress_percent: i16,
    pub stage_label: Option<String>,
    pub log_lines: Vec<String>,
    pub score: Option<i16>,
    pub summary: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_progress_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    /// A queued job as it looks right after insertion.
    pub fn queued(id: i64, new: NewJob) -> Self {
        Self {
            id,
            job_uid: new.job_uid,
            rider_id: new.rider_id,
            dedup_key: new.dedup_key,
            content_hash: new.content_hash,
            status: JobStatus::Queued,
            metadata: new.metadata,
            progress_percent: 0,
            stage_label: None,
            log_lines: Vec::new(),
            score: None,
            summary: None,
            result: None,
            error_message: None,
            created_at: new.created_at,
            started_at: None,
            finished_at: None,
            last_progress_at: None,
        }
    }
}
