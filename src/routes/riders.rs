use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::Error;
use crate::models::api::RiderView;
use crate::models::audit::SealAuditEntry;
use crate::models::rider::{NewRider, Rider};
use crate::routes::actor::{RequestActor, VerifiedActor};
use crate::routes::error::ApiError;
use crate::services::seal::{self, NewContent};
use crate::services::{integrity, redirect, storage};

pub(crate) async fn load_rider(state: &AppState, token: Uuid) -> Result<Rider, ApiError> {
    state
        .store
        .rider_by_token(token)
        .await?
        .ok_or_else(|| Error::NotFound(format!("rider {token}")).into())
}

pub(crate) async fn view(state: &AppState, rider: &Rider) -> Result<RiderView, ApiError> {
    let redirect = if rider.seal_state.is_terminal() {
        Some(redirect::resolve(state.store.as_ref(), rider).await?)
    } else {
        None
    };
    Ok(RiderView::new(rider, &state.settings.public_base_url, redirect))
}

/// Pull the `file` field out of an upload.
async fn read_upload(multipart: &mut Multipart, limit: usize) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.to_string()))?;
            if data.is_empty() {
                return Err(ApiError::bad_request("uploaded file is empty"));
            }
            if data.len() > limit {
                return Err(ApiError::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "too_large",
                    format!("upload exceeds {limit} bytes"),
                ));
            }
            return Ok(data.to_vec());
        }
    }
    Err(ApiError::bad_request("missing `file` field"))
}

/// POST /api/v1/riders: upload a new rider.
pub async fn upload_rider(
    State(state): State<AppState>,
    VerifiedActor(actor): VerifiedActor,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<RiderView>), ApiError> {
    let owner_id = actor
        .id
        .ok_or_else(|| ApiError::bad_request("uploads need an identified owner"))?;
    let data = read_upload(&mut multipart, state.settings.max_upload_bytes).await?;
    let hash = integrity::compute_hash(&data);

    let new = NewRider::new(owner_id, Some(hash.clone()), data.len() as i64, Utc::now());
    let key = storage::rider_key(new.token, &hash);
    state.storage.put(&key, &data).await?;

    let rider = state.store.insert_rider(new.with_content_key(key)).await?;
    tracing::info!(
        rider_id = rider.id,
        owner_id = owner_id,
        byte_size = rider.byte_size,
        "Rider uploaded"
    );
    Ok((StatusCode::CREATED, Json(view(&state, &rider).await?)))
}

/// GET /api/v1/riders/{token}: rider view, with redirect resolution when expired.
pub async fn get_rider(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> Result<Json<RiderView>, ApiError> {
    let rider = load_rider(&state, token).await?;
    Ok(Json(view(&state, &rider).await?))
}

/// PUT /api/v1/riders/{token}/content: replace the content of an open rider.
pub async fn reupload_rider(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
    VerifiedActor(actor): VerifiedActor,
    mut multipart: Multipart,
) -> Result<Json<RiderView>, ApiError> {
    let rider = load_rider(&state, token).await?;
    if !actor.may_act_for(rider.owner_id) {
        return Err(Error::Forbidden("not the owner of this rider".to_string()).into());
    }
    if !rider.seal_state.is_open() {
        return Err(Error::PreconditionFailed(format!(
            "content of a {} rider cannot be replaced",
            rider.seal_state
        ))
        .into());
    }

    let data = read_upload(&mut multipart, state.settings.max_upload_bytes).await?;
    let hash = integrity::compute_hash(&data);
    let key = storage::rider_key(rider.token, &hash);
    state.storage.put(&key, &data).await?;

    let content = NewContent {
        content_hash: hash,
        byte_size: data.len() as i64,
        content_key: Some(key),
    };
    let rider = seal::reupload(state.store.as_ref(), &actor, rider.id, content).await?;
    Ok(Json(view(&state, &rider).await?))
}

/// GET /api/v1/riders/{token}/audit: seal audit trail, oldest first.
pub async fn get_audit_trail(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> Result<Json<Vec<SealAuditEntry>>, ApiError> {
    let rider = load_rider(&state, token).await?;
    if !actor.may_act_for(rider.owner_id) {
        return Err(Error::Forbidden("not the owner of this rider".to_string()).into());
    }
    Ok(Json(state.store.audit_trail(rider.id).await?))
}
