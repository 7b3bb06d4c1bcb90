use axum::extract::{Path, State};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    public_link, RedirectRequest, RedirectResponse, RiderView, SealResponse, TransitionRequest,
};
use crate::models::rider::SealState;
use crate::routes::actor::VerifiedActor;
use crate::routes::error::ApiError;
use crate::routes::riders::{load_rider, view};
use crate::services::redirect;
use crate::services::seal::{self, SealChange};

/// POST /api/v1/riders/{token}/seal: administrative seal transition.
pub async fn transition_seal(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
    VerifiedActor(actor): VerifiedActor,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<SealResponse>, ApiError> {
    request.validate()?;
    let target = SealState::parse_input(&request.state)
        .ok_or_else(|| ApiError::bad_request(format!("unknown seal state {:?}", request.state)))?;

    let rider = load_rider(&state, token).await?;
    let mut change = SealChange::to(target);
    if let Some(replacement) = request.superseded_by {
        change = change.with_replacement(load_rider(&state, replacement).await?.id);
    }
    if let Some(reason) = request.reason {
        change = change.with_reason(reason);
    }

    let rider = seal::transition(state.store.as_ref(), &actor, rider.id, &change).await?;
    let redirect = match rider.seal_state {
        SealState::Expired => Some(redirect::resolve(state.store.as_ref(), &rider).await?),
        _ => None,
    };
    Ok(Json(SealResponse {
        state: rider.seal_state,
        redirect,
    }))
}

/// POST /api/v1/riders/{token}/redirect: point an expired rider at its replacement.
pub async fn select_redirect(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
    VerifiedActor(actor): VerifiedActor,
    Json(request): Json<RedirectRequest>,
) -> Result<Json<RedirectResponse>, ApiError> {
    request.validate()?;
    let rider = load_rider(&state, token).await?;
    let target = match request.target {
        Some(target) => Some(load_rider(&state, target).await?.id),
        None => None,
    };

    let rider = seal::set_redirect(state.store.as_ref(), &actor, rider.id, target).await?;
    let resolution = redirect::resolve(state.store.as_ref(), &rider).await?;
    Ok(Json(RedirectResponse {
        public_link: resolution
            .target
            .map(|t| public_link(&state.settings.public_base_url, t)),
        redirect: resolution,
    }))
}

/// POST /api/v1/riders/{token}/manual-review: owner asks for a human review.
pub async fn request_manual_review(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
    VerifiedActor(actor): VerifiedActor,
) -> Result<Json<RiderView>, ApiError> {
    let rider = load_rider(&state, token).await?;
    let rider = seal::request_manual_review(state.store.as_ref(), &actor, rider.id).await?;
    Ok(Json(view(&state, &rider).await?))
}
