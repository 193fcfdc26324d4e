//! Shared HTTP plumbing for the Google REST APIs
//!
//! Wraps a `reqwest::Client` with bearer authentication and maps error
//! responses (`{"error": {"code", "message", "errors": [{"reason"}]}}`)
//! into [`RemoteError::Http`] so the retry executor can classify them.

use crate::error::{RemoteError, RemoteResult};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

/// Authenticated client for Google APIs
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    token: String,
}

impl ApiClient {
    /// Create a client using an OAuth access token
    pub fn new(token: impl Into<String>) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("drive-share/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            token: token.into(),
        })
    }

    /// GET request builder
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url).bearer_auth(&self.token)
    }

    /// POST request builder
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url).bearer_auth(&self.token)
    }

    /// PUT request builder
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.client.put(url).bearer_auth(&self.token)
    }

    /// Send a request and decode a JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Send a request, mapping non-success statuses to errors
    pub async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status.as_u16(), &body))
    }
}

/// Build a [`RemoteError`] from a Google error response
pub fn error_from_body(status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let reason = envelope
                .error
                .errors
                .iter()
                .find_map(|e| e.reason.clone())
                .or(envelope.error.status);
            RemoteError::Http {
                status,
                reason,
                message: envelope.error.message,
            }
        }
        Err(_) => RemoteError::Http {
            status,
            reason: None,
            message: body.chars().take(200).collect(),
        },
    }
}
