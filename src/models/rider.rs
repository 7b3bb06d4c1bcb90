use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Certification state of a rider.
///
/// The legacy names (`cap`, `pendent`, `validat`, `caducat`) are accepted when
/// parsing; the canonical English names are always emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
pub enum SealState {
    #[strum(to_string = "none", serialize = "cap")]
    #[serde(alias = "cap")]
    None,
    #[strum(to_string = "pending", serialize = "pendent")]
    #[serde(alias = "pendent")]
    Pending,
    #[strum(to_string = "validated", serialize = "validat")]
    #[serde(alias = "validat")]
    Validated,
    #[strum(to_string = "expired", serialize = "caducat")]
    #[serde(alias = "caducat")]
    Expired,
}

impl SealState {
    /// States a rider can still be reworked in (reupload, promotion).
    pub fn is_open(self) -> bool {
        matches!(self, SealState::None | SealState::Pending)
    }

    pub fn is_terminal(self) -> bool {
        self == SealState::Expired
    }

    /// Parse user input, trimming and ignoring case.
    pub fn parse_input(raw: &str) -> Option<Self> {
        raw.trim().to_ascii_lowercase().parse().ok()
    }
}

/// An uploaded document under certification.
#[derive(Debug, Clone, PartialEq)]
pub struct Rider {
    pub id: i64,
    pub token: Uuid,
    pub owner_id: i64,
    pub content_hash: Option<String>,
    pub byte_size: i64,
    pub content_key: Option<String>,
    pub seal_state: SealState,
    pub superseded_by: Option<i64>,
    pub last_score: Option<i16>,
    pub manual_review_requested: bool,
    pub uploaded_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub manual_requested_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Values for inserting a freshly uploaded rider.
#[derive(Debug, Clone)]
pub struct NewRider {
    pub token: Uuid,
    pub owner_id: i64,
    pub content_hash: Option<String>,
    pub byte_size: i64,
    pub content_key: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl NewRider {
    pub fn new(owner_id: i64, content_hash: Option<String>, byte_size: i64, now: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4(),
            owner_id,
            content_hash,
            byte_size,
            content_key: None,
            uploaded_at: now,
        }
    }

    pub fn with_content_key(mut self, key: impl Into<String>) -> Self {
        self.content_key = Some(key.into());
        self
    }
}
