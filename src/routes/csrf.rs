use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::CsrfResponse;
use crate::routes::actor::RequestActor;
use crate::routes::error::ApiError;

/// GET /api/v1/csrf: anti-forgery token for the calling actor.
pub async fn issue_token(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
) -> Result<Json<CsrfResponse>, ApiError> {
    let (token, expires_at_epoch) = state.csrf.issue(&actor)?;
    Ok(Json(CsrfResponse {
        token,
        expires_at_epoch,
    }))
}
