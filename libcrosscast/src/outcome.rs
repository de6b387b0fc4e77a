//! Per-backend outcomes of a crosspost call
//!
//! Each backend dispatch settles into a [`Dispatched`] value that already
//! carries its platform tag. [`classify`] turns it into an [`Outcome`] with a
//! human-readable rendering, and [`AggregateFailure`] bundles all outcomes of
//! a call that failed overall.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BackendConfig;
use crate::error::PlatformError;
use crate::platforms::{PlatformKind, PostedMessage};

/// Separator between the summary lines of a chain
pub const CHAIN_SEPARATOR: &str = "\n====\n";

/// Result of one (message-or-chain, backend) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outcome {
    Error {
        platform: PlatformKind,
        message: String,
    },
    Success {
        platform: PlatformKind,
        /// Whether the call posted a chain rather than a single message
        chain: bool,
        summary: String,
        posts: Vec<PostedMessage>,
    },
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn platform(&self) -> PlatformKind {
        match self {
            Self::Error { platform, .. } | Self::Success { platform, .. } => *platform,
        }
    }

    /// Error message or success summary
    pub fn message(&self) -> &str {
        match self {
            Self::Error { message, .. } => message,
            Self::Success { summary, .. } => summary,
        }
    }

    /// Posts created, empty for errors
    pub fn posts(&self) -> &[PostedMessage] {
        match self {
            Self::Error { .. } => &[],
            Self::Success { posts, .. } => posts,
        }
    }
}

/// A failed backend dispatch, with the configuration it ran against
#[derive(Error, Debug, Clone)]
#[error("{} error:\n\n{cause}", .config.label())]
pub struct DispatchError {
    pub cause: PlatformError,
    pub config: BackendConfig,
}

/// A settled backend dispatch
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub platform: PlatformKind,
    pub chain: bool,
    pub result: std::result::Result<Vec<PostedMessage>, DispatchError>,
}

impl Dispatched {
    /// Whether the backend failed because its credentials were rejected
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            &self.result,
            Err(DispatchError {
                cause: PlatformError::Authentication(_),
                ..
            })
        )
    }
}

/// Map a settled dispatch to its outcome
pub fn classify(dispatched: Dispatched) -> Outcome {
    let Dispatched {
        platform,
        chain,
        result,
    } = dispatched;

    match result {
        Ok(posts) => Outcome::Success {
            platform,
            chain,
            summary: summarize(&posts),
            posts,
        },
        Err(error) => Outcome::Error {
            platform,
            message: error.to_string(),
        },
    }
}

/// One human-readable line per post, joined by [`CHAIN_SEPARATOR`]
pub fn summarize(posts: &[PostedMessage]) -> String {
    posts
        .iter()
        .map(format_post)
        .collect::<Vec<_>>()
        .join(CHAIN_SEPARATOR)
}

/// `<text>\n<created at> => <uri>`
pub fn format_post(post: &PostedMessage) -> String {
    let text = if post.text.is_empty() {
        "<no text>"
    } else {
        post.text.as_str()
    };

    format!(
        "{}\n{} => {}",
        text,
        post.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        post.uri
    )
}

/// Overall failure of a crosspost call
///
/// Raised when every backend failed, or when any backend failed and the call
/// rejects on any failure. Carries every outcome, successes included.
#[derive(Error, Debug, Clone)]
#[error("{rendered}")]
pub struct AggregateFailure {
    outcomes: Vec<Outcome>,
    rendered: String,
    credentials_rejected: bool,
}

impl AggregateFailure {
    pub fn new(outcomes: Vec<Outcome>) -> Self {
        let details = serde_json::to_string_pretty(&outcomes)
            .unwrap_or_else(|e| format!("<outcomes could not be rendered: {}>", e));

        Self {
            rendered: format!("Failed to crosspost:\n{}", details),
            outcomes,
            credentials_rejected: false,
        }
    }

    /// Mark the failure as caused by every backend rejecting its credentials
    pub fn with_credentials_rejected(mut self, rejected: bool) -> Self {
        self.credentials_rejected = rejected;
        self
    }

    /// Whether every backend failed to authenticate
    pub fn credentials_rejected(&self) -> bool {
        self.credentials_rejected
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<Outcome> {
        self.outcomes
    }

    pub fn error_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_error()).count()
    }
}
