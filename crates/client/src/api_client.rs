//! HTTP API client for the event platform's REST endpoints.
//!
//! The chat socket only needs one thing from here: a short-lived socket token.
//! Everything else goes through the generic [`ApiClient::request`].

use eventhub_shared::ApiError;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ClientConfig;

/// Path of the socket-token endpoint, relative to the API base.
pub const WS_TOKEN_PATH: &str = "chat/get-ws-token/";

/// Raw response of [`ApiClient::request`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct WsTokenResponse {
    token: String,
}

/// HTTP client for the platform API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    bearer: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            bearer: None,
        }
    }

    /// Create a client rooted at the configured API base.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new().with_base_url(config.api_base.as_str())
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Authenticate requests with a bearer token.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, String), ApiError> {
        let url = self.url(path);
        let mut rb = self.client.request(method.clone(), &url);

        if let Some(token) = &self.bearer {
            rb = rb.bearer_auth(token);
        }
        if let Some(bytes) = body {
            rb = rb.header("Content-Type", "application/json").body(bytes);
        }

        crate::log_debug!("{} {}", method, url);
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok((status, text))
    }

    /// Issue a request and return the status plus the decoded JSON body.
    ///
    /// Empty bodies decode to `null`; non-JSON bodies are returned as a string.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiError> {
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| ApiError::Deserialize(e.to_string()))?;
        let (status, text) = self.send(method, path, body).await?;

        let data = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            data,
        })
    }

    /// Make a GET request and decode the JSON response
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let (_, text) = self.send(Method::GET, path, None).await?;
        decode(&text)
    }

    /// Make a POST request with JSON body
    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let body_bytes =
            serde_json::to_vec(body).map_err(|e| ApiError::Deserialize(e.to_string()))?;
        let (_, text) = self.send(Method::POST, path, Some(body_bytes)).await?;
        decode(&text)
    }

    /// Fetch a short-lived token for opening a chat socket.
    pub async fn ws_token(&self) -> Result<String, ApiError> {
        let resp: WsTokenResponse = self.get_json(WS_TOKEN_PATH).await?;
        Ok(resp.token)
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

fn decode<TRes: DeserializeOwned>(text: &str) -> Result<TRes, ApiError> {
    let text = if text.is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))
}
