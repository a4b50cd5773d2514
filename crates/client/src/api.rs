//! REST client for the board snapshot endpoints.
//!
//! Wraps the three team-scoped `GET` endpoints used for the initial board
//! load using [`reqwest`]. The bearer token is read from the
//! [`TokenProvider`] on every request.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use retroboard_core::models::{ActionItem, ColumnTitle, Thought};
use serde::de::DeserializeOwned;

use crate::auth::TokenProvider;

/// HTTP client for one board API base URL.
pub struct BoardApi {
    client: reqwest::Client,
    api_url: String,
    tokens: Arc<dyn TokenProvider>,
}

/// Errors from the board REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server refused the token. Not retried.
    #[error("Not authorized ({status})")]
    Unauthorized { status: u16 },

    /// Any other non-2xx response.
    #[error("Board API error ({status}): {body}")]
    Status { status: u16, body: String },
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

impl BoardApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8080`. A trailing
    ///   slash is ignored.
    pub fn new(
        api_url: &str,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url, tokens))
    }

    /// Reuse an existing [`reqwest::Client`] (shared connection pool).
    pub fn with_client(
        client: reqwest::Client,
        api_url: &str,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// `GET /api/team/{team}/thoughts`
    pub async fn get_thoughts(&self, team_id: &str) -> Result<Vec<Thought>, ApiError> {
        self.get_json(team_id, "thoughts").await
    }

    /// `GET /api/team/{team}/action-item`
    pub async fn get_action_items(&self, team_id: &str) -> Result<Vec<ActionItem>, ApiError> {
        self.get_json(team_id, "action-item").await
    }

    /// `GET /api/team/{team}/columns`
    pub async fn get_column_titles(&self, team_id: &str) -> Result<Vec<ColumnTitle>, ApiError> {
        self.get_json(team_id, "columns").await
    }

    // ---- private helpers ----

    fn team_url(&self, team_id: &str, resource: &str) -> String {
        format!("{}/api/team/{}/{}", self.api_url, team_id, resource)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        team_id: &str,
        resource: &str,
    ) -> Result<T, ApiError> {
        let mut request = self.client.get(self.team_url(team_id, resource));
        if let Some(token) = self.tokens.token() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Map non-2xx statuses onto [`ApiError`], keeping the body for
    /// debugging.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}
