//! Test helper utilities for E2E testing
#![allow(dead_code)]

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Response from GET /api/v1/csrf
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfResponse {
    pub token: String,
    pub expires_at_epoch: i64,
}

/// Rider as returned by the rider endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderResponse {
    pub token: Uuid,
    pub state: String,
    pub content_hash: Option<String>,
    pub last_score: Option<i16>,
    pub public_link: String,
    pub redirect: Option<serde_json::Value>,
}

/// Client whose requests carry the gateway actor headers.
pub fn actor_client(actor_id: i64, role: &str) -> Result<reqwest::Client, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    headers.insert("x-actor-id", HeaderValue::from_str(&actor_id.to_string())?);
    headers.insert("x-actor-role", HeaderValue::from_str(role)?);
    Ok(reqwest::Client::builder().default_headers(headers).build()?)
}

/// Fetch an anti-forgery token for the client's actor
pub async fn csrf_token(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let response = client
        .get(format!("{}/api/v1/csrf", base_url))
        .send()
        .await?;

    if !response.status().is_success() {
        let error_text = response.text().await?;
        return Err(format!("CSRF token request failed: {}", error_text).into());
    }
    Ok(response.json::<CsrfResponse>().await?.token)
}

/// Upload rider content
pub async fn upload_rider(
    client: &reqwest::Client,
    base_url: &str,
    csrf: &str,
    content: &[u8],
) -> Result<RiderResponse, Box<dyn std::error::Error>> {
    let form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(content.to_vec())
            .file_name("rider.txt")
            .mime_str("text/plain")?,
    );

    let response = client
        .post(format!("{}/api/v1/riders", base_url))
        .header("x-csrf-token", csrf)
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<RiderResponse>().await?)
}

/// POST a JSON body to a rider sub-resource, returning status and body
pub async fn post_rider_action(
    client: &reqwest::Client,
    base_url: &str,
    csrf: &str,
    token: Uuid,
    action: &str,
    body: serde_json::Value,
) -> Result<(reqwest::StatusCode, serde_json::Value), Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/v1/riders/{}/{}", base_url, token, action))
        .header("x-csrf-token", csrf)
        .json(&body)
        .send()
        .await?;
    let status = response.status();
    let body = response.json::<serde_json::Value>().await?;
    Ok((status, body))
}

/// Poll a job until it reports `done` or `gone` (with timeout)
pub async fn poll_until_done(
    client: &reqwest::Client,
    base_url: &str,
    poll_url: &str,
    timeout_secs: u64,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client.get(format!("{}{}", base_url, poll_url)).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Poll failed: {}", error_text).into());
        }

        let snapshot = response.json::<serde_json::Value>().await?;
        if snapshot["phase"] == "done" || snapshot["gone"] == true {
            return Ok(snapshot);
        }
        if attempt % 10 == 0 && attempt > 0 {
            println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
        }
        sleep(Duration::from_millis(500)).await;
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}
