//! Backend adapter: single posts and reply chains on one platform
//!
//! The adapter owns one [`PlatformClient`] for the duration of a crosspost
//! call. Every network operation it issues goes through
//! [`with_retry`](crate::retry::with_retry).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::config::{duration_serde, BackendConfig};
use crate::error::{PlatformError, PlatformResult};
use crate::retry::{with_retry, RetryPolicy};
use crate::types::{Attachment, AttachmentSource, ImageMimeType, Message, MessageInput};

use super::{
    MediaHandle, MediaInput, MediaPayload, MediaUpload, PlatformClient, PlatformKind,
    PostRequest, PostedMessage, ReplyTarget,
};

/// Tunables shared by every backend adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSettings {
    pub retry: RetryPolicy,

    /// Pause between successive posts of a chain
    #[serde(with = "duration_serde")]
    pub inter_post_delay: Duration,

    /// Overall bound for waiting on asynchronous media processing
    #[serde(with = "duration_serde")]
    pub media_processing_timeout: Duration,

    /// Pause between two media processing checks
    #[serde(with = "duration_serde")]
    pub media_poll_interval: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            inter_post_delay: Duration::from_secs(3),
            media_processing_timeout: Duration::from_secs(5 * 60),
            media_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Media ready to hand to the client
///
/// Holds the temporary file backing a spooled upload, which is removed when
/// this value is dropped.
struct PreparedMedia {
    upload: MediaUpload,
    _spool: Option<NamedTempFile>,
}

/// Drives one platform client through logins, posts and chains
pub struct BackendAdapter {
    client: Box<dyn PlatformClient>,
    kind: PlatformKind,
    retry: RetryPolicy,
    inter_post_delay: Duration,
    media_processing_timeout: Duration,
    media_poll_interval: Duration,
}

impl BackendAdapter {
    /// Create an adapter for `client`
    ///
    /// The backend's own `inter_post_delay` overrides the one in `settings`.
    pub fn new(
        client: Box<dyn PlatformClient>,
        config: &BackendConfig,
        settings: &AdapterSettings,
    ) -> Self {
        Self {
            kind: client.kind(),
            client,
            retry: settings.retry.clone(),
            inter_post_delay: config.inter_post_delay().unwrap_or(settings.inter_post_delay),
            media_processing_timeout: settings.media_processing_timeout,
            media_poll_interval: settings.media_poll_interval,
        }
    }

    pub fn kind(&self) -> PlatformKind {
        self.kind
    }

    fn label(&self, operation: &str) -> String {
        format!("{} {}", self.kind, operation)
    }

    /// Establish the client's session
    pub async fn login(&self) -> PlatformResult<()> {
        let client = self.client.as_ref();
        with_retry(&self.label("login"), &self.retry, || client.login()).await
    }

    /// Post a single message or a chain, logging in first
    ///
    /// An empty chain returns no posts and never contacts the backend.
    pub async fn submit(&self, input: &MessageInput) -> PlatformResult<Vec<PostedMessage>> {
        match input {
            MessageInput::Chain(messages) if messages.is_empty() => {
                debug!("{}: empty chain, nothing to post", self.kind);
                Ok(Vec::new())
            }
            MessageInput::Chain(messages) => {
                self.login().await?;
                self.post_chain(messages).await
            }
            MessageInput::Single(message) => {
                self.login().await?;
                let posted = self.post_one(message, None).await?;
                Ok(vec![posted])
            }
        }
    }

    /// Post one message, optionally as a reply
    ///
    /// Uploads every attachment, waits until the platform finished processing
    /// them, then creates the post. One idempotency token is generated for the
    /// post and sent with every attempt to create it.
    pub async fn post_one(
        &self,
        message: &Message,
        reply: Option<&ReplyTarget>,
    ) -> PlatformResult<PostedMessage> {
        let mut media = Vec::with_capacity(message.media.len());
        for attachment in &message.media {
            media.push(self.upload_attachment(attachment).await?);
        }
        let media = self.wait_for_media(media).await?;

        let request = PostRequest {
            text: message.text.clone(),
            media,
            reply: reply.cloned(),
            visibility: message.visibility,
            idempotency_key: self.client.new_idempotency_key(),
        };

        let client = self.client.as_ref();
        let request = &request;
        let posted = with_retry(&self.label("create post"), &self.retry, || {
            client.create_post(request)
        })
        .await?;

        debug!("{}: created post {}", self.kind, posted.uri);
        Ok(posted)
    }

    /// Post messages as a reply thread, in order
    ///
    /// Each message after the first replies to its predecessor and references
    /// the first post as thread root. The inter-post delay elapses before every
    /// post but the first. Posts already created stay in place when a later
    /// one fails.
    pub async fn post_chain(&self, messages: &[Message]) -> PlatformResult<Vec<PostedMessage>> {
        let mut posted: Vec<PostedMessage> = Vec::with_capacity(messages.len());

        for (index, message) in messages.iter().enumerate() {
            let reply = match (posted.first(), posted.last()) {
                (Some(root), Some(parent)) => Some(ReplyTarget {
                    parent: parent.post_ref(),
                    root: root.post_ref(),
                }),
                _ => None,
            };

            if index > 0 && !self.inter_post_delay.is_zero() {
                sleep(self.inter_post_delay).await;
            }

            debug!(
                "{}: posting chain message {}/{}",
                self.kind,
                index + 1,
                messages.len()
            );
            posted.push(self.post_one(message, reply.as_ref()).await?);
        }

        Ok(posted)
    }

    async fn upload_attachment(&self, attachment: &Attachment) -> PlatformResult<MediaHandle> {
        let prepared = self.prepare_media(attachment).await?;
        let client = self.client.as_ref();
        let upload = &prepared.upload;

        let handle = with_retry(&self.label("media upload"), &self.retry, || {
            client.upload_media(upload)
        })
        .await?;

        // Retrying the description must not upload the media again
        if handle.caption.as_deref().is_some_and(|c| !c.is_empty()) {
            let described = &handle;
            with_retry(&self.label("media description"), &self.retry, || {
                client.describe_media(described)
            })
            .await?;
        }

        Ok(handle)
    }

    /// Bring an attachment into the form the client consumes
    async fn prepare_media(&self, attachment: &Attachment) -> PlatformResult<PreparedMedia> {
        let (payload, spool) = match (&attachment.source, self.client.media_input()) {
            (AttachmentSource::Path(path), MediaInput::Bytes) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    PlatformError::MediaRead(format!("{}: {}", path.display(), e))
                })?;
                (MediaPayload::Bytes(bytes), None)
            }
            (AttachmentSource::Path(path), MediaInput::File) => {
                tokio::fs::metadata(path).await.map_err(|e| {
                    PlatformError::MediaRead(format!("{}: {}", path.display(), e))
                })?;
                (MediaPayload::File(path.clone()), None)
            }
            (AttachmentSource::Bytes(bytes), MediaInput::Bytes) => {
                (MediaPayload::Bytes(bytes.clone()), None)
            }
            (AttachmentSource::Bytes(bytes), MediaInput::File) => {
                let spool = spool_to_tempfile(bytes).await?;
                (MediaPayload::File(spool.path().to_path_buf()), Some(spool))
            }
        };

        Ok(PreparedMedia {
            upload: MediaUpload {
                payload,
                caption: attachment.caption.clone(),
                focus: attachment.focus,
            },
            _spool: spool,
        })
    }

    async fn wait_for_media(&self, media: Vec<MediaHandle>) -> PlatformResult<Vec<MediaHandle>> {
        if !media.iter().any(|handle| handle.processing) {
            return Ok(media);
        }

        match timeout(self.media_processing_timeout, self.poll_until_processed(media)).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::MediaProcessingTimeout(format!(
                "{} media still processing after {}",
                self.kind,
                humantime::format_duration(self.media_processing_timeout)
            ))),
        }
    }

    async fn poll_until_processed(
        &self,
        media: Vec<MediaHandle>,
    ) -> PlatformResult<Vec<MediaHandle>> {
        let client = self.client.as_ref();
        let label = self.label("media status");
        let mut ready = Vec::with_capacity(media.len());

        for mut handle in media {
            while handle.processing {
                sleep(self.media_poll_interval).await;
                let current = &handle;
                let refreshed =
                    with_retry(&label, &self.retry, || client.check_media(current)).await?;
                handle = refreshed;
            }
            ready.push(handle);
        }

        Ok(ready)
    }
}

/// Write in-memory media to a uniquely named temporary file
async fn spool_to_tempfile(bytes: &[u8]) -> PlatformResult<NamedTempFile> {
    let suffix = ImageMimeType::from_magic_bytes(bytes)
        .map(|mime| format!(".{}", mime.extension()))
        .unwrap_or_default();

    let spool = tempfile::Builder::new()
        .prefix("crosscast-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| PlatformError::MediaRead(format!("failed to create temporary file: {}", e)))?;

    tokio::fs::write(spool.path(), bytes).await.map_err(|e| {
        PlatformError::MediaRead(format!("{}: {}", spool.path().display(), e))
    })?;

    Ok(spool)
}
