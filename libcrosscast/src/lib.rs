//! Crosscast - post one message or a reply thread to many social networks
//!
//! This library fans a message (or an ordered chain of messages) out to
//! Mastodon, Bluesky and Twitter accounts concurrently, retries every network
//! operation, and reports one outcome per account.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosscast::{crosspost, BackendConfig, BlueskyConfig, GlobalConfig, MastodonConfig};
//!
//! # async fn example() -> libcrosscast::Result<()> {
//! let targets: Vec<BackendConfig> = vec![
//!     MastodonConfig::new("https://botsin.space", "token").into(),
//!     BlueskyConfig::new("me.bsky.social", "app-password").into(),
//! ];
//!
//! let result = crosspost(vec!["first", "second"], targets, &GlobalConfig::default()).await?;
//! for outcome in result.outcomes() {
//!     println!("{}", outcome.message());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crosspost;
pub mod error;
pub mod logging;
pub mod outcome;
pub mod platforms;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use config::{BackendConfig, BlueskyConfig, Config, GlobalConfig, MastodonConfig, TwitterConfig};
pub use crosspost::{crosspost, Crossposted, Crossposter, Targets};
pub use error::{ConfigError, CrosscastError, PlatformError, Result};
pub use outcome::{AggregateFailure, Outcome};
pub use platforms::adapter::AdapterSettings;
pub use platforms::{PlatformKind, PostedMessage};
pub use retry::RetryPolicy;
pub use types::{Attachment, Focus, Message, MessageInput, Visibility};
