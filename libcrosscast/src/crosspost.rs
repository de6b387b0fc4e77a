//! Crosspost orchestration
//!
//! A call moves through four phases: every backend is dispatched
//! concurrently, all dispatches are awaited until each one settled, every
//! settled dispatch is classified into an [`Outcome`], and the partial-failure
//! policy decides whether the call fulfills or rejects.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, BlueskyConfig, GlobalConfig, MastodonConfig, TwitterConfig};
use crate::error::Result;
use crate::outcome::{classify, AggregateFailure, DispatchError, Dispatched, Outcome};
use crate::platforms::adapter::{AdapterSettings, BackendAdapter};
use crate::platforms::http::HttpConnector;
use crate::platforms::Connector;
use crate::types::MessageInput;

/// Backends of a crosspost call
///
/// A single backend yields a single outcome; a list yields one outcome per
/// entry, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    Single(BackendConfig),
    Many(Vec<BackendConfig>),
}

impl Targets {
    fn into_list(self) -> (bool, Vec<BackendConfig>) {
        match self {
            Self::Single(config) => (true, vec![config]),
            Self::Many(configs) => (false, configs),
        }
    }
}

impl From<BackendConfig> for Targets {
    fn from(config: BackendConfig) -> Self {
        Self::Single(config)
    }
}

impl From<MastodonConfig> for Targets {
    fn from(config: MastodonConfig) -> Self {
        Self::Single(config.into())
    }
}

impl From<BlueskyConfig> for Targets {
    fn from(config: BlueskyConfig) -> Self {
        Self::Single(config.into())
    }
}

impl From<TwitterConfig> for Targets {
    fn from(config: TwitterConfig) -> Self {
        Self::Single(config.into())
    }
}

impl From<Vec<BackendConfig>> for Targets {
    fn from(configs: Vec<BackendConfig>) -> Self {
        Self::Many(configs)
    }
}

/// Result of a fulfilled crosspost call, shaped like its [`Targets`]
#[derive(Debug, Clone, PartialEq)]
pub enum Crossposted {
    Single(Outcome),
    Many(Vec<Outcome>),
}

impl Crossposted {
    pub fn outcomes(&self) -> &[Outcome] {
        match self {
            Self::Single(outcome) => std::slice::from_ref(outcome),
            Self::Many(outcomes) => outcomes,
        }
    }

    pub fn into_outcomes(self) -> Vec<Outcome> {
        match self {
            Self::Single(outcome) => vec![outcome],
            Self::Many(outcomes) => outcomes,
        }
    }
}

/// Verdict of the partial-failure policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fulfill,
    Reject,
}

/// Apply the partial-failure policy to the outcomes of a call
///
/// Rejects when every outcome is an error, or when any is and
/// `reject_on_any_failure` is set.
pub fn decide(outcomes: &[Outcome], global: &GlobalConfig) -> Decision {
    let errors = outcomes.iter().filter(|o| o.is_error()).count();

    if errors == outcomes.len() || (errors > 0 && global.reject_on_any_failure) {
        Decision::Reject
    } else {
        Decision::Fulfill
    }
}

/// Crosspost orchestrator
#[derive(Clone)]
pub struct Crossposter {
    connector: Arc<dyn Connector>,
    settings: AdapterSettings,
}

impl Crossposter {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::from_shared(Arc::new(connector))
    }

    pub fn from_shared(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            settings: AdapterSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: AdapterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    /// Post a message or chain to every target backend
    ///
    /// Backends run concurrently and independently; a failing backend never
    /// cancels another.
    ///
    /// # Errors
    ///
    /// Returns `CrosscastError::Aggregate` carrying every outcome when the
    /// partial-failure policy rejects the call. Backend failures are otherwise
    /// reported as error outcomes.
    pub async fn crosspost(
        &self,
        messages: impl Into<MessageInput>,
        targets: impl Into<Targets>,
        global: &GlobalConfig,
    ) -> Result<Crossposted> {
        let input = messages.into();
        let (single_target, configs) = targets.into().into_list();

        debug!(
            "Dispatching {} to {} backend(s)",
            if input.is_chain() { "chain" } else { "message" },
            configs.len()
        );
        let dispatches = configs.iter().map(|config| self.dispatch(&input, config));

        debug!("Awaiting all backends");
        let settled = join_all(dispatches).await;

        debug!("Deciding on {} outcome(s)", settled.len());
        let credentials_rejected =
            !settled.is_empty() && settled.iter().all(Dispatched::is_authentication_failure);
        let mut outcomes: Vec<Outcome> = settled.into_iter().map(classify).collect();

        match decide(&outcomes, global) {
            Decision::Reject => {
                warn!(
                    "Crosspost rejected: {} of {} backend(s) failed",
                    outcomes.iter().filter(|o| o.is_error()).count(),
                    outcomes.len()
                );
                Err(AggregateFailure::new(outcomes)
                    .with_credentials_rejected(credentials_rejected)
                    .into())
            }
            Decision::Fulfill => {
                debug!("Crosspost fulfilled");
                // A single target always settles into exactly one outcome
                if single_target {
                    if let Some(outcome) = outcomes.pop() {
                        return Ok(Crossposted::Single(outcome));
                    }
                }
                Ok(Crossposted::Many(outcomes))
            }
        }
    }

    async fn dispatch(&self, input: &MessageInput, config: &BackendConfig) -> Dispatched {
        let platform = config.kind();
        let chain = input.is_chain();

        let result = match self.connector.connect(config) {
            Ok(client) => {
                let adapter = BackendAdapter::new(client, config, &self.settings);
                adapter.submit(input).await
            }
            Err(cause) => Err(cause),
        };

        match &result {
            Ok(posts) => info!("{}: posted {} message(s)", config.label(), posts.len()),
            Err(cause) => warn!("{}: {}", config.label(), cause),
        }

        Dispatched {
            platform,
            chain,
            result: result.map_err(|cause| DispatchError {
                cause,
                config: config.clone(),
            }),
        }
    }
}

/// Post a message or chain through the platforms' HTTP APIs
///
/// Uses default adapter settings; see [`Crossposter`] for control over them.
pub async fn crosspost(
    messages: impl Into<MessageInput>,
    targets: impl Into<Targets>,
    global: &GlobalConfig,
) -> Result<Crossposted> {
    Crossposter::new(HttpConnector::new()?)
        .crosspost(messages, targets, global)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::{MockBehavior, MockConnector};
    use crate::platforms::PlatformKind;
    use crate::CrosscastError;

    fn error() -> Outcome {
        Outcome::Error {
            platform: PlatformKind::Mastodon,
            message: "down".to_string(),
        }
    }

    fn success() -> Outcome {
        Outcome::Success {
            platform: PlatformKind::Bluesky,
            chain: false,
            summary: String::new(),
            posts: Vec::new(),
        }
    }

    #[test]
    fn test_decide_all_success_fulfills() {
        let global = GlobalConfig::default();
        assert_eq!(decide(&[success(), success()], &global), Decision::Fulfill);
    }

    #[test]
    fn test_decide_partial_failure_fulfills_by_default() {
        let global = GlobalConfig::default();
        assert_eq!(decide(&[success(), error()], &global), Decision::Fulfill);
    }

    #[test]
    fn test_decide_partial_failure_rejects_when_configured() {
        let global = GlobalConfig {
            reject_on_any_failure: true,
        };
        assert_eq!(decide(&[success(), error()], &global), Decision::Reject);
    }

    #[test]
    fn test_decide_total_failure_always_rejects() {
        for reject_on_any_failure in [false, true] {
            let global = GlobalConfig {
                reject_on_any_failure,
            };
            assert_eq!(decide(&[error(), error()], &global), Decision::Reject);
            assert_eq!(decide(&[error()], &global), Decision::Reject);
        }
    }

    #[test]
    fn test_crossposted_outcomes_view() {
        let single = Crossposted::Single(success());
        assert_eq!(single.outcomes().len(), 1);

        let many = Crossposted::Many(vec![success(), error()]);
        assert_eq!(many.clone().into_outcomes(), vec![success(), error()]);
        assert_eq!(many.outcomes()[1], error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_target_yields_single_outcome() {
        let crossposter = Crossposter::new(MockConnector::new());
        let target = MastodonConfig::new("https://a.example", "t");

        let result = crossposter
            .crosspost("hello", target, &GlobalConfig::default())
            .await
            .unwrap();

        match result {
            Crossposted::Single(Outcome::Success { platform, posts, chain, .. }) => {
                assert_eq!(platform, PlatformKind::Mastodon);
                assert_eq!(posts.len(), 1);
                assert!(!chain);
            }
            other => panic!("Expected a single success, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_element_list_yields_list() {
        let crossposter = Crossposter::new(MockConnector::new());
        let targets = vec![BackendConfig::from(MastodonConfig::new("https://a.example", "t"))];

        let result = crossposter
            .crosspost("hello", targets, &GlobalConfig::default())
            .await
            .unwrap();

        assert!(matches!(result, Crossposted::Many(ref outcomes) if outcomes.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failing_target_rejects() {
        let connector =
            MockConnector::new().with_behavior("https://a.example", MockBehavior::failing_login());
        let crossposter = Crossposter::new(connector);

        let result = crossposter
            .crosspost(
                "hello",
                MastodonConfig::new("https://a.example", "t"),
                &GlobalConfig::default(),
            )
            .await;

        match result {
            Err(CrosscastError::Aggregate(failure)) => {
                assert_eq!(failure.error_count(), 1);
                assert!(failure.to_string().contains("mastodon (https://a.example) error"));
            }
            other => panic!("Expected aggregate failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_credentials_everywhere_exit_as_authentication_failure() {
        let connector = MockConnector::new()
            .with_behavior("https://a.example", MockBehavior::failing_login())
            .with_behavior("https://b.example", MockBehavior::failing_login());
        let crossposter = Crossposter::new(connector);
        let targets = vec![
            BackendConfig::from(MastodonConfig::new("https://a.example", "t")),
            BackendConfig::from(MastodonConfig::new("https://b.example", "t")),
        ];

        let error = crossposter
            .crosspost("hello", targets, &GlobalConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(&error, CrosscastError::Aggregate(f) if f.credentials_rejected()));
        assert_eq!(error.exit_code(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_failures_exit_as_posting_failure() {
        let connector = MockConnector::new()
            .with_behavior("https://a.example", MockBehavior::failing_login())
            .with_behavior(
                "https://b.example",
                MockBehavior {
                    fail_post_at: Some(0),
                    ..MockBehavior::default()
                },
            );
        let crossposter = Crossposter::new(connector);
        let targets = vec![
            BackendConfig::from(MastodonConfig::new("https://a.example", "t")),
            BackendConfig::from(MastodonConfig::new("https://b.example", "t")),
        ];

        let error = crossposter
            .crosspost("hello", targets, &GlobalConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(&error, CrosscastError::Aggregate(f) if !f.credentials_rejected()));
        assert_eq!(error.exit_code(), 1);
    }
}
