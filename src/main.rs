use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use rider_seal::app_state::{AppState, Settings};
use rider_seal::config::AppConfig;
use rider_seal::db;
use rider_seal::routes::{self, metrics::MetricsState};
use rider_seal::services::{csrf::CsrfGuard, queue::JobQueue, storage::R2Client};

/// Multipart framing on top of the raw upload.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing rider-seal server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "analysis_jobs_enqueued_total",
        "Analysis jobs created"
    );
    metrics::describe_counter!(
        "analysis_jobs_attached_total",
        "Analysis requests that attached to an already active job"
    );
    metrics::describe_counter!(
        "analysis_jobs_finished_total",
        "Analysis jobs finished, by outcome"
    );
    metrics::describe_counter!(
        "seal_transitions_total",
        "Applied seal transitions, by target state"
    );
    metrics::describe_counter!(
        "auto_promotions_total",
        "Riders promoted to validated by an analysis score"
    );
    metrics::describe_histogram!(
        "analysis_job_seconds",
        "Time from claim to completion of an analysis job"
    );
    metrics::describe_gauge!(
        "analysis_queue_depth",
        "Analysis jobs waiting to be claimed"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize R2 storage client
    tracing::info!("Initializing R2 storage client");
    let r2_client = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize R2 client");

    // Initialize Redis hand-off queue
    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let csrf = CsrfGuard::new(&config.csrf_secret, config.csrf_ttl_secs);

    // Create shared application state
    let state = AppState::new(db_pool, r2_client, queue, csrf, Settings::from(&config));
    let metrics_state = MetricsState {
        handle: prometheus_handle,
        store: state.store.clone(),
    };

    let body_limit = config.max_upload_bytes + BODY_OVERHEAD_BYTES;
    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit));

    tracing::info!("Starting rider-seal on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
