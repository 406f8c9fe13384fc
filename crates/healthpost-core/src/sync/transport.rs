//! Authenticated HTTP transport for batch submission

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use super::reconcile::BatchReply;
use crate::config::RemoteConfig;
use crate::protocol::{BatchErrorBody, BatchItem, BatchResponse};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Submission failed as a whole; nothing can be inferred about individual items
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Sync request timed out")]
    Timeout,
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {0}")]
    Api(String),
    #[error("Invalid sync response: {0}")]
    InvalidPayload(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Seam between the sync client and the server
#[allow(async_fn_in_trait)]
pub trait SyncTransport {
    /// Submit one ordered batch in a single call
    async fn submit(&self, batch: &[BatchItem]) -> TransportResult<BatchReply>;
}

/// Production transport: `POST {api_url}/api/sync` with a bearer credential
#[derive(Clone)]
pub struct HttpSyncTransport {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncTransport")
            .field("endpoint", &self.endpoint)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpSyncTransport {
    pub fn new(remote: &RemoteConfig) -> TransportResult<Self> {
        let base = normalize_endpoint(remote.api_url.clone())?;
        let token = normalize_text_option(Some(remote.token.clone())).ok_or_else(|| {
            TransportError::InvalidConfiguration("token must not be empty".to_string())
        })?;

        Ok(Self {
            endpoint: format!("{base}/api/sync"),
            token,
            client: reqwest::Client::builder().timeout(remote.timeout).build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SyncTransport for HttpSyncTransport {
    async fn submit(&self, batch: &[BatchItem]) -> TransportResult<BatchReply> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(batch)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if status.is_success() {
            let parsed = serde_json::from_str::<BatchResponse>(&body).map_err(|error| {
                TransportError::InvalidPayload(format!("{error}: {}", compact_text(&body)))
            })?;
            return Ok(BatchReply::Completed(parsed));
        }

        match serde_json::from_str::<BatchErrorBody>(&body) {
            Ok(rejection) if rejection.index.is_some() => Ok(BatchReply::Rejected(rejection)),
            _ => Err(TransportError::Api(parse_api_error(status, &body))),
        }
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(error)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> TransportResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        TransportError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(TransportError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
