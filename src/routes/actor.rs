//! Actor context from the trusted gateway headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::app_state::AppState;
use crate::models::actor::{Actor, ActorKind};
use crate::routes::error::ApiError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const CSRF_HEADER: &str = "x-csrf-token";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Parse the actor headers. The system actor cannot be claimed over HTTP.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let id = header(headers, ACTOR_ID_HEADER)
        .ok_or_else(|| ApiError::unauthorized("missing actor id"))?
        .parse::<i64>()
        .map_err(|_| ApiError::unauthorized("malformed actor id"))?;

    let kind = match header(headers, ACTOR_ROLE_HEADER) {
        None => ActorKind::User,
        Some(role) => match role.parse::<ActorKind>() {
            Ok(ActorKind::System) | Err(_) => {
                return Err(ApiError::unauthorized(format!("unknown actor role {role:?}")))
            }
            Ok(kind) => kind,
        },
    };

    Ok(Actor { id: Some(id), kind })
}

/// Identified caller, for read-only endpoints.
pub struct RequestActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for RequestActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(RequestActor)
    }
}

/// Identified caller carrying a valid anti-forgery token, for mutations.
pub struct VerifiedActor(pub Actor);

impl FromRequestParts<AppState> for VerifiedActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let actor = actor_from_headers(&parts.headers)?;
        let token = header(&parts.headers, CSRF_HEADER)
            .ok_or_else(|| ApiError::forbidden("missing anti-forgery token"))?;
        state.csrf.verify(token, &actor)?;
        Ok(VerifiedActor(actor))
    }
}
