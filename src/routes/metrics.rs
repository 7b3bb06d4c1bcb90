use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::db::Store;

/// State for the scrape endpoint.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub store: Arc<dyn Store>,
}

/// Prometheus metrics scrape endpoint.
/// Refreshes the queued-job gauge, then renders the text exposition format.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.store.queued_count().await {
        Ok(depth) => ::metrics::gauge!("analysis_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Failed to read analysis backlog"),
    }
    state.handle.render()
}
