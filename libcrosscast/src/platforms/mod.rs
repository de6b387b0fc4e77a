//! Platform abstraction and implementations
//!
//! Every social network is reached through a [`PlatformClient`], the opaque
//! collaborator that knows how to log in, upload media and create posts. The
//! [`adapter`] module drives a client through single posts and reply chains,
//! and a [`Connector`] builds one fresh client per backend and call.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosscast::config::{BackendConfig, MastodonConfig};
//! use libcrosscast::platforms::{adapter::{AdapterSettings, BackendAdapter}, http::HttpConnector, Connector};
//! use libcrosscast::types::Message;
//!
//! # async fn example() -> libcrosscast::error::Result<()> {
//! let config = BackendConfig::from(MastodonConfig::new("https://botsin.space", "token"));
//! let connector = HttpConnector::new()?;
//! let client = connector.connect(&config)?;
//!
//! let adapter = BackendAdapter::new(client, &config, &AdapterSettings::default());
//! adapter.login().await?;
//! let posted = adapter.post_one(&Message::new("Hello, fediverse!"), None).await?;
//! println!("Posted: {}", posted.uri);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::PlatformResult;
use crate::types::{Focus, Visibility};

pub mod adapter;
pub mod bluesky;
pub mod http;
pub mod mastodon;
pub mod twitter;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Platform family of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Mastodon,
    Bluesky,
    Twitter,
}

impl PlatformKind {
    /// Lowercase identifier (e.g. "mastodon")
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mastodon => "mastodon",
            Self::Bluesky => "bluesky",
            Self::Twitter => "twitter",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of a created post, usable as a reply target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub id: String,
    /// Content hash, for platforms that address records by it (Bluesky)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

/// Reply linkage for a post within a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTarget {
    /// The immediately preceding post
    pub parent: PostRef,
    /// The first post of the chain
    pub root: PostRef,
}

/// A successfully created post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedMessage {
    pub platform: PlatformKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Canonical URI of the post
    pub uri: String,
    /// Effective text as stored by the platform
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl PostedMessage {
    pub fn post_ref(&self) -> PostRef {
        PostRef {
            id: self.id.clone(),
            cid: self.cid.clone(),
        }
    }
}

/// Handle to uploaded media, referenced by a later post
#[derive(Debug, Clone, PartialEq)]
pub struct MediaHandle {
    pub id: String,
    /// Set while the platform is still processing the upload
    pub processing: bool,
    /// Platform-native reference embedded in the post (Bluesky blob)
    pub blob: Option<serde_json::Value>,
    /// Alt text, for platforms that attach it to the post rather than the upload
    pub caption: Option<String>,
}

impl MediaHandle {
    pub fn ready(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            processing: false,
            blob: None,
            caption: None,
        }
    }
}

/// Form in which a client wants media handed to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaInput {
    #[default]
    Bytes,
    File,
}

/// Media data as handed to a client
#[derive(Clone, PartialEq, Eq)]
pub enum MediaPayload {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "Bytes(<{} bytes>)", bytes.len()),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// One media upload request
#[derive(Debug, Clone, PartialEq)]
pub struct MediaUpload {
    pub payload: MediaPayload,
    pub caption: Option<String>,
    pub focus: Option<Focus>,
}

/// One post creation request
#[derive(Debug, Clone, PartialEq)]
pub struct PostRequest {
    pub text: String,
    pub media: Vec<MediaHandle>,
    pub reply: Option<ReplyTarget>,
    pub visibility: Option<Visibility>,
    /// Token that lets the platform recognise a retried request
    pub idempotency_key: String,
}

/// Network operations of one social-network account
///
/// A client holds its own session; [`login`](Self::login) establishes it and
/// must succeed before the other operations are used. Implementations must be
/// safe to call again after a failed or timed-out attempt, since every
/// operation is retried by the adapter.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Platform family of this client
    fn kind(&self) -> PlatformKind;

    /// Whether uploads take media as bytes or as a file on disk
    fn media_input(&self) -> MediaInput {
        MediaInput::Bytes
    }

    /// Generate the idempotency token for one post
    ///
    /// Called once per post; the same token is reused for every retry of that
    /// post.
    fn new_idempotency_key(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Establish an authenticated session
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` if the credentials are rejected
    /// or the service cannot be reached.
    async fn login(&self) -> PlatformResult<()>;

    /// Upload one piece of media
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::MediaUpload` on any upload failure.
    async fn upload_media(&self, upload: &MediaUpload) -> PlatformResult<MediaHandle>;

    /// Check whether asynchronous processing of uploaded media finished
    ///
    /// Returns the refreshed handle; `processing` stays set while the
    /// platform is not done. Platforms without asynchronous processing keep
    /// the default, which reports the handle as ready.
    async fn check_media(&self, handle: &MediaHandle) -> PlatformResult<MediaHandle> {
        Ok(MediaHandle {
            processing: false,
            ..handle.clone()
        })
    }

    /// Attach the handle's caption as alt text
    ///
    /// Only called for handles with a non-empty caption. Platforms that take
    /// the caption with the upload or the post keep the default, which does
    /// nothing.
    async fn describe_media(&self, _handle: &MediaHandle) -> PlatformResult<()> {
        Ok(())
    }

    /// Create a post
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::PostCreation` if the platform rejects the post.
    async fn create_post(&self, request: &PostRequest) -> PlatformResult<PostedMessage>;
}

/// Builds a platform client for a backend configuration
pub trait Connector: Send + Sync {
    /// Create a fresh, not yet logged-in client
    fn connect(&self, config: &BackendConfig) -> PlatformResult<Box<dyn PlatformClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_kind_names() {
        assert_eq!(PlatformKind::Mastodon.to_string(), "mastodon");
        assert_eq!(PlatformKind::Bluesky.name(), "bluesky");
        assert_eq!(
            serde_json::to_string(&PlatformKind::Twitter).unwrap(),
            "\"twitter\""
        );
    }

    #[test]
    fn test_media_payload_debug_hides_bytes() {
        let payload = MediaPayload::Bytes(vec![0; 2048]);
        assert_eq!(format!("{:?}", payload), "Bytes(<2048 bytes>)");
    }
}
