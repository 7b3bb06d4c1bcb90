use axum::extract::{Path, State};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{IntegrityRequest, IntegrityResponse};
use crate::routes::error::ApiError;
use crate::routes::riders::load_rider;
use crate::services::integrity;

/// POST /api/v1/riders/{token}/integrity: compare a locally computed hash
/// with the published one. Informational only.
pub async fn check_integrity(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
    Json(request): Json<IntegrityRequest>,
) -> Result<Json<IntegrityResponse>, ApiError> {
    request.validate()?;
    let rider = load_rider(&state, token).await?;
    let outcome = integrity::check(&request.local_hash, rider.content_hash.as_deref());
    Ok(Json(IntegrityResponse {
        outcome,
        canonical_hash: rider.content_hash,
    }))
}
