use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the analysis hand-off queue
    pub redis_url: String,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// Analyzer endpoint that scores rider content
    pub analyzer_url: String,

    /// Bearer token for the analyzer
    pub analyzer_token: String,

    /// HMAC secret for anti-forgery tokens
    pub csrf_secret: String,

    #[serde(default = "default_csrf_ttl_secs")]
    pub csrf_ttl_secs: u64,

    /// Base URL used to build public rider links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Running jobs without progress for this long are flagged stale
    #[serde(default = "default_stale_job_secs")]
    pub stale_job_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_csrf_ttl_secs() -> u64 {
    3600
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_stale_job_secs() -> u64 {
    600
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(String, String)> {
        [
            ("DATABASE_URL", "postgres://localhost/riders"),
            ("REDIS_URL", "redis://localhost"),
            ("R2_BUCKET", "riders"),
            ("R2_ENDPOINT", "https://r2.example"),
            ("R2_ACCESS_KEY", "ak"),
            ("R2_SECRET_KEY", "sk"),
            ("ANALYZER_URL", "https://analyzer.example/score"),
            ("ANALYZER_TOKEN", "token"),
            ("CSRF_SECRET", "secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults_apply() {
        let config: AppConfig = envy::from_iter(required()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.csrf_ttl_secs, 3600);
        assert_eq!(config.stale_job_secs, 600);
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.public_base_url, "http://localhost:3000");
    }

    #[test]
    fn test_overrides_and_missing_values() {
        let mut vars = required();
        vars.push(("STALE_JOB_SECS".into(), "30".into()));
        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert_eq!(config.stale_job_secs, 30);

        let missing: Result<AppConfig, _> = envy::from_iter(required().into_iter().skip(1));
        assert!(missing.is_err());
    }
}
