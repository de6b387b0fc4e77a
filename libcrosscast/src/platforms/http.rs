//! Shared HTTP plumbing for the platform clients

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::BackendConfig;
use crate::error::{ConfigError, PlatformError, PlatformResult, Result};

use super::bluesky::BlueskyClient;
use super::mastodon::MastodonClient;
use super::twitter::TwitterClient;
use super::{Connector, MediaPayload, PlatformClient};

/// Constructor of the error kind for the failing operation
pub(crate) type ErrorKind = fn(String) -> PlatformError;

/// Connector that talks to the real platform APIs
///
/// Clients built by one connector share its connection pool; each keeps its
/// own session.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
}

impl HttpConnector {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("crosscast/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::Http(e.to_string()))?;

        Ok(Self { http })
    }

    /// Use an existing `reqwest` client
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Connector for HttpConnector {
    fn connect(&self, config: &BackendConfig) -> PlatformResult<Box<dyn PlatformClient>> {
        let client: Box<dyn PlatformClient> = match config {
            BackendConfig::Mastodon(c) => Box::new(MastodonClient::new(self.http.clone(), c)),
            BackendConfig::Bluesky(c) => Box::new(BlueskyClient::new(self.http.clone(), c)),
            BackendConfig::Twitter(c) => Box::new(TwitterClient::new(self.http.clone(), c)),
        };
        Ok(client)
    }
}

/// Media bytes of an upload, reading the file if the payload names one
pub(crate) async fn payload_bytes(payload: &MediaPayload) -> PlatformResult<Vec<u8>> {
    match payload {
        MediaPayload::Bytes(bytes) => Ok(bytes.clone()),
        MediaPayload::File(path) => tokio::fs::read(path)
            .await
            .map_err(|e| PlatformError::MediaRead(format!("{}: {}", path.display(), e))),
    }
}

/// Map a transport failure to the operation's error kind
pub(crate) fn transport_error(context: &str, kind: ErrorKind) -> impl FnOnce(reqwest::Error) -> PlatformError + '_ {
    move |e| kind(format!("{}: {}", context, e))
}

/// Pass successful responses through and turn the rest into errors
///
/// The error embeds the HTTP status and the message the server returned, if
/// one can be found in the body.
pub(crate) async fn check_status(
    response: reqwest::Response,
    context: &str,
    kind: ErrorKind,
) -> PlatformResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(kind(status_detail(context, status.as_u16(), &body)))
}

/// Describe a failed response by its status and the server's message
pub(crate) fn status_detail(context: &str, status: u16, body: &str) -> String {
    match server_message(body) {
        Some(message) => format!("{}: HTTP {}: {}", context, status, message),
        None => format!("{}: HTTP {}", context, status),
    }
}

/// Check the status and decode a JSON body
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
    kind: ErrorKind,
) -> PlatformResult<T> {
    check_status(response, context, kind)
        .await?
        .json::<T>()
        .await
        .map_err(|e| kind(format!("{}: invalid response: {}", context, e)))
}

/// Extract the human-readable error from a platform's error body
///
/// Understands Mastodon (`error`), XRPC (`message`) and Twitter v1.1/v2
/// (`errors[0].message`, `detail`) shapes; falls back to the raw body.
pub(crate) fn server_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return Some(truncate(trimmed));
    };

    let field = |v: &serde_json::Value, name: &str| {
        v.get(name).and_then(|m| m.as_str()).map(str::to_string)
    };

    field(&value, "message")
        .or_else(|| field(&value, "error_description"))
        .or_else(|| field(&value, "error"))
        .or_else(|| field(&value, "detail"))
        .or_else(|| {
            value
                .get("errors")
                .and_then(|e| e.get(0))
                .and_then(|e| field(e, "message"))
        })
        .or_else(|| Some(truncate(trimmed)))
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 300;
    match text.char_indices().nth(LIMIT) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
