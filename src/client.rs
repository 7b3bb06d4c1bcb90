//! Client half of the progress poller.
//!
//! A [`Subscription`] is the value a client persists (local storage, a file,
//! a session) so it can pick up polling after a reload. It can always be
//! rebuilt from the rider token alone through the resume endpoint, which never
//! creates a job.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::job::JobStatus;
use crate::services::poller::{Attachment, PollPhase, PollSnapshot};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Consecutive transport failures tolerated by [`PollClient::follow`].
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub document_id: Uuid,
    pub job_handle: String,
    pub poll_url: String,
    pub last_seen_status: Option<JobStatus>,
    /// Number of log lines already consumed.
    pub log_cursor: usize,
    pub gone: bool,
}

/// What a snapshot meant to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Status moved forward or new data arrived.
    Progressed,
    /// An out-of-order snapshot behind what was already seen; ignored.
    Regressed,
    /// The job reached a terminal status.
    Finished,
    /// The server no longer tracks the job.
    Gone,
}

impl Subscription {
    pub fn new(document_id: Uuid, attachment: &Attachment) -> Self {
        Self {
            document_id,
            job_handle: attachment.job.clone(),
            poll_url: attachment.poll_url.clone(),
            last_seen_status: Some(attachment.status),
            log_cursor: 0,
            gone: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.gone || self.last_seen_status.is_some_and(JobStatus::is_finished)
    }

    /// Fold a snapshot into the subscription, keeping the highest status seen.
    pub fn observe(&mut self, snapshot: &PollSnapshot) -> Observation {
        if snapshot.gone {
            self.gone = true;
            return Observation::Gone;
        }
        let Some(status) = snapshot.status else {
            return Observation::Regressed;
        };
        if let Some(seen) = self.last_seen_status {
            // Success and error are equally final; the first one seen wins.
            if PollPhase::from(status) < PollPhase::from(seen)
                || (seen.is_finished() && status != seen)
            {
                return Observation::Regressed;
            }
        }

        self.last_seen_status = Some(status);
        self.log_cursor = self
            .log_cursor
            .max(snapshot.log_offset + snapshot.log_lines.len());

        if status.is_finished() {
            Observation::Finished
        } else {
            Observation::Progressed
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("No analysis exists for rider {0}")]
    NoAnalysis(Uuid),

    #[error("Gave up after {0} consecutive poll failures")]
    TooManyFailures(u32),
}

/// HTTP client for the analysis endpoints.
pub struct PollClient {
    http: reqwest::Client,
    base_url: String,
    interval: Duration,
}

impl PollClient {
    /// `http` should carry whatever identity headers the gateway expects.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Start analysis or attach to the active one. A 409 is an attach.
    pub async fn start_or_attach(
        &self,
        document_id: Uuid,
        csrf_token: &str,
    ) -> Result<Subscription, ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/riders/{document_id}/analysis")))
            .header("x-csrf-token", csrf_token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() || status == StatusCode::CONFLICT => {
                let attachment: Attachment = response.json().await?;
                Ok(Subscription::new(document_id, &attachment))
            }
            status => Err(ClientError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Rebuild a subscription from the rider token alone.
    pub async fn resume(&self, document_id: Uuid) -> Result<Subscription, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/riders/{document_id}/analysis")))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ClientError::NoAnalysis(document_id)),
            status if status.is_success() => {
                let attachment: Attachment = response.json().await?;
                Ok(Subscription::new(document_id, &attachment))
            }
            status => Err(ClientError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Fetch one snapshot, asking only for log lines not yet consumed.
    pub async fn poll_once(&self, subscription: &Subscription) -> Result<PollSnapshot, ClientError> {
        let response = self
            .http
            .get(self.url(&subscription.poll_url))
            .query(&[("since", subscription.log_cursor)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    /// Poll until the job finishes or disappears.
    ///
    /// Polling pauses while `visible` is `false` and resumes where it left
    /// off. `on_update` sees every accepted snapshot; regressions are skipped.
    pub async fn follow<F>(
        &self,
        subscription: &mut Subscription,
        mut visible: watch::Receiver<bool>,
        mut on_update: F,
    ) -> Result<PollSnapshot, ClientError>
    where
        F: FnMut(&PollSnapshot),
    {
        let mut failures = 0;
        loop {
            while !*visible.borrow_and_update() {
                if visible.changed().await.is_err() {
                    // Visibility source dropped; keep polling.
                    break;
                }
            }

            match self.poll_once(subscription).await {
                Ok(snapshot) => {
                    failures = 0;
                    match subscription.observe(&snapshot) {
                        Observation::Regressed => {}
                        Observation::Progressed => on_update(&snapshot),
                        Observation::Finished | Observation::Gone => {
                            on_update(&snapshot);
                            return Ok(snapshot);
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(job = %subscription.job_handle, error = %e, failures, "Poll failed");
                    if failures >= MAX_CONSECUTIVE_ERRORS {
                        return Err(ClientError::TooManyFailures(failures));
                    }
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
