use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{PgStore, Store};
use crate::services::{csrf::CsrfGuard, queue::JobQueue, storage::R2Client};

/// Settings the handlers need from the configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub public_base_url: String,
    pub stale_job_secs: u64,
    pub max_upload_bytes: usize,
}

impl From<&AppConfig> for Settings {
    fn from(config: &AppConfig) -> Self {
        Self {
            public_base_url: config.public_base_url.clone(),
            stale_job_secs: config.stale_job_secs,
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub store: Arc<dyn Store>,
    pub storage: Arc<R2Client>,
    pub queue: Arc<JobQueue>,
    pub csrf: Arc<CsrfGuard>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        storage: R2Client,
        queue: JobQueue,
        csrf: CsrfGuard,
        settings: Settings,
    ) -> Self {
        Self {
            store: Arc::new(PgStore::new(db.clone())),
            db,
            storage: Arc::new(storage),
            queue: Arc::new(queue),
            csrf: Arc::new(csrf),
            settings: Arc::new(settings),
        }
    }

    pub fn stale_after(&self) -> chrono::Duration {
        let secs = std::time::Duration::from_secs(self.settings.stale_job_secs);
        chrono::Duration::from_std(secs).unwrap_or(chrono::Duration::MAX)
    }
}
