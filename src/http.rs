//! Minimal HTTP client for the `GET /delay/<seconds>` fan-out calls.
//!
//! Trimmed down from the teacher's `scrapers::http_client::HttpClient`: no
//! ETag/conditional-request bookkeeping is needed here, but the shape —
//! a cloneable wrapper around a shared `reqwest::Client`, reporting elapsed
//! time and status alongside the body — is the same.

use std::time::Instant;

use thiserror::Error;

use crate::queue::HttpResult;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// A cheaply-cloneable client for issuing delay calls against an
/// httpbin-compatible endpoint.
#[derive(Clone)]
pub struct DelayClient {
    client: reqwest::Client,
    base_url: String,
}

impl DelayClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }

    /// Issue `GET {base_url}/delay/{seconds}` and capture status, body, and
    /// elapsed wall-clock time. A failure here (network error, body-read
    /// error) is the signal callers use to mark the enclosing row failed.
    pub async fn delay(&self, seconds: f64) -> Result<HttpResult, HttpError> {
        let url = format!("{}/delay/{:.2}", self.base_url, seconds);
        let started = Instant::now();

        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16() as i64;
        let body = response.text().await?;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        Ok(HttpResult {
            body,
            status,
            duration_ms,
        })
    }
}
