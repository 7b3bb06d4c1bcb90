use std::time::Duration;

use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use crate::services::tracker::JobOutcome;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for the external rider analyzer.
pub struct AnalyzerClient {
    http: Client,
    url: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzerResponse {
    score: f64,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

impl AnalyzerClient {
    pub fn new(url: String, api_token: String) -> Result<Self, AnalyzerError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            url,
            api_token,
        })
    }

    /// Send rider content for scoring.
    pub async fn analyze(
        &self,
        content: &[u8],
        content_hash: Option<&str>,
    ) -> Result<JobOutcome, AnalyzerError> {
        let request_body = serde_json::json!({
            "content": base64::engine::general_purpose::STANDARD.encode(content),
            "contentHash": content_hash,
        });

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        parse_outcome(&text)
    }
}

fn parse_outcome(body: &str) -> Result<JobOutcome, AnalyzerError> {
    let parsed: AnalyzerResponse = serde_json::from_str(body)?;
    if !(0.0..=100.0).contains(&parsed.score) {
        return Err(AnalyzerError::ScoreOutOfRange(parsed.score));
    }
    Ok(JobOutcome {
        score: parsed.score.round() as i16,
        summary: parsed.summary,
        result: parsed.details,
    })
}

/// Failure talking to the analyzer. Recorded on the job, never retried.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Analyzer responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse analyzer response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Analyzer score {0} is outside 0-100")]
    ScoreOutOfRange(f64),
}
