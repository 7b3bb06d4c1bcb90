pub mod actor;
pub mod analysis;
pub mod csrf;
pub mod error;
pub mod health;
pub mod integrity;
pub mod metrics;
pub mod riders;
pub mod seal;

use axum::routing::{get, post, put};
use axum::Router;

use crate::app_state::AppState;

/// Versioned API routes.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/csrf", get(csrf::issue_token))
        .route("/api/v1/riders", post(riders::upload_rider))
        .route("/api/v1/riders/{token}", get(riders::get_rider))
        .route("/api/v1/riders/{token}/content", put(riders::reupload_rider))
        .route("/api/v1/riders/{token}/audit", get(riders::get_audit_trail))
        .route("/api/v1/riders/{token}/seal", post(seal::transition_seal))
        .route("/api/v1/riders/{token}/redirect", post(seal::select_redirect))
        .route(
            "/api/v1/riders/{token}/manual-review",
            post(seal::request_manual_review),
        )
        .route(
            "/api/v1/riders/{token}/integrity",
            post(integrity::check_integrity),
        )
        .route(
            "/api/v1/riders/{token}/analysis",
            post(analysis::start_analysis).get(analysis::resume_analysis),
        )
        .route("/api/v1/analysis/jobs/{job_uid}", get(analysis::poll_job))
        .route(
            "/api/v1/analysis/jobs/{job_uid}/cancel",
            post(analysis::cancel_job),
        )
        .with_state(state)
}
