use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::rider::{Rider, SealState};
use crate::services::integrity::IntegrityCheck;
use crate::services::redirect::RedirectResolution;

/// Body of `POST /api/v1/riders/{token}/seal`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    /// Target state name; legacy names are accepted.
    #[garde(length(min = 1, max = 32))]
    pub state: String,

    /// Replacement rider, only honoured when moving to expired.
    #[garde(skip)]
    pub superseded_by: Option<Uuid>,

    #[garde(length(max = 500))]
    pub reason: Option<String>,
}

/// Body of `POST /api/v1/riders/{token}/redirect`. `target: null` clears.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedirectRequest {
    #[garde(skip)]
    pub target: Option<Uuid>,
}

/// Body of `POST /api/v1/riders/{token}/integrity`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityRequest {
    #[garde(length(max = 256))]
    pub local_hash: String,
}

/// Public URL of a rider.
pub fn public_link(base_url: &str, token: Uuid) -> String {
    format!("{}/riders/{token}", base_url.trim_end_matches('/'))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderView {
    pub token: Uuid,
    pub state: SealState,
    pub content_hash: Option<String>,
    pub byte_size: i64,
    pub last_score: Option<i16>,
    pub manual_review_requested: bool,
    pub public_link: String,
    /// Only present for expired riders.
    pub redirect: Option<RedirectResolution>,
    pub uploaded_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl RiderView {
    pub fn new(rider: &Rider, base_url: &str, redirect: Option<RedirectResolution>) -> Self {
        Self {
            token: rider.token,
            state: rider.seal_state,
            content_hash: rider.content_hash.clone(),
            byte_size: rider.byte_size,
            last_score: rider.last_score,
            manual_review_requested: rider.manual_review_requested,
            public_link: public_link(base_url, rider.token),
            redirect,
            uploaded_at: rider.uploaded_at,
            published_at: rider.published_at,
            expired_at: rider.expired_at,
        }
    }
}

/// Response of the seal-transition endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SealResponse {
    pub state: SealState,
    pub redirect: Option<RedirectResolution>,
}

/// Response of the redirect-selection endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectResponse {
    /// Link to the resolved replacement, when resolution succeeds.
    pub public_link: Option<String>,
    pub redirect: RedirectResolution,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityResponse {
    pub outcome: IntegrityCheck,
    pub canonical_hash: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfResponse {
    pub token: String,
    pub expires_at_epoch: i64,
}
