//! Client configuration from environment variables.

use eventhub_shared::{chat_path, notifications_path, ChannelIdentity};
use thiserror::Error;
use url::Url;

/// Socket base used when nothing is configured.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";
/// REST base used when nothing is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL `{value}`: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported URL scheme `{0}` (expected ws, wss, http or https)")]
    UnsupportedScheme(String),
}

/// Endpoints the chat client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base of the real-time endpoints, always `ws://` or `wss://`.
    pub ws_base: Url,
    /// Base of the REST API, ending in `/`.
    pub api_base: Url,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WS_URL, DEFAULT_API_URL).expect("default URLs are valid")
    }
}

impl ClientConfig {
    /// Build a configuration from explicit base URLs.
    ///
    /// `http(s)://` socket bases are rewritten to `ws(s)://`.
    pub fn new(ws_base: &str, api_base: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            ws_base: parse_ws_base(ws_base)?,
            api_base: parse_api_base(api_base)?,
        })
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `EVENTHUB_DEBUG`: `"true"` selects the dev socket URL (default: prod)
    /// - `EVENTHUB_WS_DEV_URL`: socket base in debug mode (default: `ws://localhost:8000`)
    /// - `EVENTHUB_WS_PROD_URL`: socket base otherwise (default: `ws://localhost:8000`)
    /// - `EVENTHUB_API_URL`: REST base (default: `http://localhost:8000/api/v1/`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let debug = lookup("EVENTHUB_DEBUG").is_some_and(|v| v == "true");
        let ws_var = if debug {
            "EVENTHUB_WS_DEV_URL"
        } else {
            "EVENTHUB_WS_PROD_URL"
        };
        let ws_base = lookup(ws_var).unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        let api_base = lookup("EVENTHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        Self::new(&ws_base, &api_base)
    }

    /// Endpoint of the chat socket for a channel.
    ///
    /// Format: `{ws_base}/ws/chat/{channel_type}/{channel_id}/?token={token}`
    pub fn chat_url(&self, channel: &ChannelIdentity, token: &str) -> Result<Url, ConfigError> {
        self.socket_url(&chat_path(channel), token)
    }

    /// Endpoint of a user's notification socket.
    ///
    /// Format: `{ws_base}/ws/notifications/{user_id}/?token={token}`
    pub fn notifications_url(&self, user_id: &str, token: &str) -> Result<Url, ConfigError> {
        self.socket_url(&notifications_path(user_id), token)
    }

    fn socket_url(&self, path: &str, token: &str) -> Result<Url, ConfigError> {
        let raw = format!(
            "{}/{}?token={}",
            self.ws_base.as_str().trim_end_matches('/'),
            path,
            urlencoding::encode(token)
        );
        Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { value: raw, source })
    }
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl {
        value: value.to_string(),
        source,
    })
}

fn parse_ws_base(value: &str) -> Result<Url, ConfigError> {
    let mut url = parse_url(value)?;
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;
    Ok(url)
}

fn parse_api_base(value: &str) -> Result<Url, ConfigError> {
    let mut url = parse_url(value)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_localhost() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.ws_base.as_str(), "ws://localhost:8000/");
        assert_eq!(config.api_base.as_str(), "http://localhost:8000/api/v1/");
    }

    #[test]
    fn debug_flag_selects_dev_socket() {
        let vars = [
            ("EVENTHUB_DEBUG", "true"),
            ("EVENTHUB_WS_DEV_URL", "ws://dev.local:9000"),
            ("EVENTHUB_WS_PROD_URL", "wss://chat.example.com"),
        ];
        let config = ClientConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.ws_base.host_str(), Some("dev.local"));

        let config = ClientConfig::from_lookup(lookup(&vars[1..])).unwrap();
        assert_eq!(config.ws_base.host_str(), Some("chat.example.com"));
    }

    #[test]
    fn http_socket_base_is_rewritten() {
        let config = ClientConfig::new("https://chat.example.com", DEFAULT_API_URL).unwrap();
        assert_eq!(config.ws_base.scheme(), "wss");
    }

    #[test]
    fn api_base_gains_trailing_slash() {
        let config = ClientConfig::new(DEFAULT_WS_URL, "https://api.example.com/api/v1").unwrap();
        assert_eq!(config.api_base.as_str(), "https://api.example.com/api/v1/");
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(matches!(
            ClientConfig::new("ftp://example.com", DEFAULT_API_URL),
            Err(ConfigError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            ClientConfig::new(DEFAULT_WS_URL, "not a url"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn notifications_url_carries_user_and_token() {
        let config = ClientConfig::new("wss://rt.example.com/", DEFAULT_API_URL).unwrap();
        let url = config.notifications_url("42", "t+1").unwrap();
        assert_eq!(url.as_str(), "wss://rt.example.com/ws/notifications/42/?token=t%2B1");
    }

    #[test]
    fn chat_url_follows_route_scheme() {
        let config = ClientConfig::default();
        let url = config
            .chat_url(&ChannelIdentity::personal("chat-1"), "tok")
            .unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/chat/personal/chat-1/?token=tok");

        let url = config
            .chat_url(&ChannelIdentity::group("77"), "a b&c")
            .unwrap();
        assert_eq!(url.path(), "/ws/chat/group/77/");
        assert_eq!(url.query(), Some("token=a%20b%26c"));
    }
}
