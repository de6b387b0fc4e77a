//! Scripted platform client for testing
//!
//! [`MockClient`] records every call it receives in a shared log and answers
//! according to a [`MockBehavior`]. [`MockConnector`] hands out mock clients
//! keyed by the account identity of a [`BackendConfig`], all writing to the
//! same log, so tests can observe a whole crosspost call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{sleep, Instant};

use crate::config::BackendConfig;
use crate::error::{PlatformError, PlatformResult};
use crate::types::Visibility;

use super::{
    Connector, MediaHandle, MediaInput, MediaPayload, MediaUpload, PlatformClient,
    PlatformKind, PostRequest, PostedMessage,
};

/// How a mock client responds
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Reject every login attempt
    pub fail_login: bool,
    /// Reject every media upload
    pub fail_uploads: bool,
    /// Number of alt text attempts that fail before they succeed
    pub describe_failures_before_success: u32,
    /// Number of post creation attempts that fail before posts succeed
    pub post_failures_before_success: u32,
    /// Zero-based index of the post that can never be created
    pub fail_post_at: Option<usize>,
    pub media_input: MediaInput,
    /// Number of status checks before uploaded media is processed
    ///
    /// `None` means media is ready right after upload; `u32::MAX` means never.
    pub media_processing_checks: Option<u32>,
    /// Time every operation takes
    pub latency: Duration,
}

impl MockBehavior {
    pub fn failing_login() -> Self {
        Self {
            fail_login: true,
            ..Self::default()
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }
}

/// An upload as seen by the mock
#[derive(Debug, Clone)]
pub struct MockUpload {
    pub upload: MediaUpload,
    /// Content of the uploaded file, read at upload time
    pub file_contents: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub enum MockOp {
    Login,
    Upload(MockUpload),
    CheckMedia(String),
    DescribeMedia(String),
    CreatePost(PostRequest),
}

/// One recorded call
#[derive(Debug, Clone)]
pub struct MockCall {
    /// Account identity of the backend that received the call
    pub backend: String,
    pub op: MockOp,
    pub at: Instant,
}

type CallLog = Arc<Mutex<Vec<MockCall>>>;

fn lock(log: &CallLog) -> MutexGuard<'_, Vec<MockCall>> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct MockState {
    logged_in: AtomicBool,
    post_attempts: AtomicU32,
    describe_attempts: AtomicU32,
    posted: AtomicUsize,
    uploaded: AtomicU32,
    checks: Mutex<HashMap<String, u32>>,
}

/// Mock platform client
///
/// Clones share their state and call log.
#[derive(Debug, Clone)]
pub struct MockClient {
    kind: PlatformKind,
    identity: String,
    behavior: MockBehavior,
    log: CallLog,
    state: Arc<MockState>,
}

impl MockClient {
    /// Create a client with a log of its own
    pub fn new(config: &BackendConfig, behavior: MockBehavior) -> Self {
        Self::with_log(config, behavior, CallLog::default())
    }

    fn with_log(config: &BackendConfig, behavior: MockBehavior, log: CallLog) -> Self {
        Self {
            kind: config.kind(),
            identity: config.identity().to_string(),
            behavior,
            log,
            state: Arc::new(MockState::default()),
        }
    }

    fn record(&self, op: MockOp) {
        lock(&self.log).push(MockCall {
            backend: self.identity.clone(),
            op,
            at: Instant::now(),
        });
    }

    async fn pause(&self) {
        if !self.behavior.latency.is_zero() {
            sleep(self.behavior.latency).await;
        }
    }

    /// Every call recorded so far
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.log).clone()
    }

    /// Every post creation attempt, in order
    pub fn post_requests(&self) -> Vec<PostRequest> {
        post_requests(&self.calls())
    }

    /// Instants at which post creation attempts started
    pub fn post_times(&self) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call.op, MockOp::CreatePost(_)))
            .map(|call| call.at)
            .collect()
    }

    /// Every upload attempt, in order
    pub fn uploads(&self) -> Vec<MockUpload> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call.op {
                MockOp::Upload(upload) => Some(upload),
                _ => None,
            })
            .collect()
    }

    /// Number of posts created successfully
    pub fn posted_count(&self) -> usize {
        self.state.posted.load(Ordering::SeqCst)
    }
}

fn post_requests(calls: &[MockCall]) -> Vec<PostRequest> {
    calls
        .iter()
        .filter_map(|call| match &call.op {
            MockOp::CreatePost(request) => Some(request.clone()),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl PlatformClient for MockClient {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    fn media_input(&self) -> MediaInput {
        self.behavior.media_input
    }

    async fn login(&self) -> PlatformResult<()> {
        self.record(MockOp::Login);
        self.pause().await;

        if self.behavior.fail_login {
            return Err(PlatformError::Authentication(format!(
                "{} login: mock rejected credentials for {}",
                self.kind, self.identity
            )));
        }

        self.state.logged_in.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_media(&self, upload: &MediaUpload) -> PlatformResult<MediaHandle> {
        let file_contents = match &upload.payload {
            MediaPayload::File(path) => std::fs::read(path).ok(),
            MediaPayload::Bytes(_) => None,
        };
        self.record(MockOp::Upload(MockUpload {
            upload: upload.clone(),
            file_contents,
        }));
        self.pause().await;

        if self.behavior.fail_uploads {
            return Err(PlatformError::MediaUpload(format!(
                "{} media upload: mock rejected upload",
                self.kind
            )));
        }

        let n = self.state.uploaded.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MediaHandle {
            id: format!("media-{}", n),
            processing: self.behavior.media_processing_checks.is_some_and(|c| c > 0),
            blob: None,
            caption: upload.caption.clone(),
        })
    }

    async fn check_media(&self, handle: &MediaHandle) -> PlatformResult<MediaHandle> {
        self.record(MockOp::CheckMedia(handle.id.clone()));
        self.pause().await;

        let required = self.behavior.media_processing_checks.unwrap_or(0);
        let seen = {
            let mut checks = self.state.checks.lock().unwrap_or_else(PoisonError::into_inner);
            let count = checks.entry(handle.id.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };

        Ok(MediaHandle {
            processing: seen < required,
            ..handle.clone()
        })
    }

    async fn describe_media(&self, handle: &MediaHandle) -> PlatformResult<()> {
        self.record(MockOp::DescribeMedia(handle.id.clone()));
        self.pause().await;

        let attempt = self.state.describe_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.behavior.describe_failures_before_success {
            return Err(PlatformError::MediaUpload(format!(
                "{} media description: transient failure {}",
                self.kind, attempt
            )));
        }
        Ok(())
    }

    async fn create_post(&self, request: &PostRequest) -> PlatformResult<PostedMessage> {
        self.record(MockOp::CreatePost(request.clone()));
        self.pause().await;

        if !self.state.logged_in.load(Ordering::SeqCst) {
            return Err(PlatformError::Authentication(format!(
                "{} create post: not logged in",
                self.kind
            )));
        }

        let attempt = self.state.post_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.behavior.post_failures_before_success {
            return Err(PlatformError::PostCreation(format!(
                "{} create post: transient failure {}",
                self.kind, attempt
            )));
        }

        let index = self.state.posted.load(Ordering::SeqCst);
        if self.behavior.fail_post_at == Some(index) {
            return Err(PlatformError::PostCreation(format!(
                "{} create post: mock refused post {}",
                self.kind, index
            )));
        }

        let n = self.state.posted.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{}", self.kind, n);
        Ok(PostedMessage {
            platform: self.kind,
            cid: (self.kind == PlatformKind::Bluesky).then(|| format!("bafymock{}", n)),
            uri: format!("mock://{}/{}/{}", self.kind, self.identity, id),
            id,
            text: request.text.clone(),
            created_at: Utc::now(),
            visibility: (self.kind == PlatformKind::Mastodon)
                .then(|| request.visibility.unwrap_or(Visibility::Public)),
        })
    }
}

/// Connector handing out mock clients
///
/// Backends without a registered behavior get `MockBehavior::default()`.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    behaviors: HashMap<String, MockBehavior>,
    log: CallLog,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the behavior for the backend with the given identity
    /// (Mastodon server, Bluesky username or Twitter API key)
    pub fn with_behavior(mut self, identity: impl Into<String>, behavior: MockBehavior) -> Self {
        self.behaviors.insert(identity.into(), behavior);
        self
    }

    /// Every call received by any client of this connector
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.log).clone()
    }

    /// Calls received by the backend with the given identity
    pub fn calls_for(&self, identity: &str) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.backend == identity)
            .collect()
    }

    /// Post creation attempts received by the backend with the given identity
    pub fn post_requests_for(&self, identity: &str) -> Vec<PostRequest> {
        post_requests(&self.calls_for(identity))
    }
}

impl Connector for MockConnector {
    fn connect(&self, config: &BackendConfig) -> PlatformResult<Box<dyn PlatformClient>> {
        let behavior = self
            .behaviors
            .get(config.identity())
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(MockClient::with_log(
            config,
            behavior,
            Arc::clone(&self.log),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MastodonConfig, TwitterConfig};

    fn request(text: &str) -> PostRequest {
        PostRequest {
            text: text.to_string(),
            media: Vec::new(),
            reply: None,
            visibility: None,
            idempotency_key: "key".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_requires_login_before_posting() {
        let config = BackendConfig::from(MastodonConfig::new("https://m.example", "t"));
        let client = MockClient::new(&config, MockBehavior::default());

        let result = client.create_post(&request("early")).await;
        assert!(matches!(result, Err(PlatformError::Authentication(_))));

        client.login().await.unwrap();
        let posted = client.create_post(&request("late")).await.unwrap();
        assert_eq!(posted.id, "mastodon-1");
        assert_eq!(posted.visibility, Some(Visibility::Public));
    }

    #[tokio::test]
    async fn test_connector_shares_log_across_clients() {
        let a = BackendConfig::from(MastodonConfig::new("https://a.example", "t"));
        let b = BackendConfig::from(TwitterConfig::new("key-b", "s", "t", "s"));
        let connector = MockConnector::new().with_behavior("key-b", MockBehavior::failing_login());

        let client_a = connector.connect(&a).unwrap();
        let client_b = connector.connect(&b).unwrap();
        client_a.login().await.unwrap();
        assert!(client_b.login().await.is_err());

        assert_eq!(connector.calls().len(), 2);
        assert_eq!(connector.calls_for("https://a.example").len(), 1);
        assert_eq!(client_b.kind(), PlatformKind::Twitter);
    }
}
