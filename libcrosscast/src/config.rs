//! Configuration management for Crosscast

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::platforms::adapter::AdapterSettings;
use crate::platforms::PlatformKind;

/// Default Bluesky PDS used when a config does not name one
pub const DEFAULT_BLUESKY_SERVICE: &str = "https://bsky.social";

/// On-disk configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: GlobalConfig,
    #[serde(default)]
    pub adapter: AdapterSettings,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Settings that govern a whole crosspost call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Fail the whole call if any backend fails.
    ///
    /// A call always fails when every backend fails; by default it succeeds
    /// with a partial result when only some of them do.
    pub reject_on_any_failure: bool,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MastodonConfig {
    /// URL of the Mastodon server, for example `https://botsin.space`
    pub server: String,
    pub token: String,
    #[serde(default, with = "duration_serde::option", skip_serializing_if = "Option::is_none")]
    pub inter_post_delay: Option<Duration>,
}

impl MastodonConfig {
    pub fn new(server: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            token: token.into(),
            inter_post_delay: None,
        }
    }

    /// Server URL with an `https://` scheme added when none is given
    pub fn server_url(&self) -> String {
        let server = self.server.trim_end_matches('/');
        if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("https://{}", server)
        }
    }
}

impl fmt::Debug for MastodonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MastodonConfig")
            .field("server", &self.server)
            .field("token", &"<redacted>")
            .field("inter_post_delay", &self.inter_post_delay)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueskyConfig {
    /// Handle or DID used to log in, for example `user.bsky.social`
    pub username: String,
    /// App password
    pub password: String,
    #[serde(default = "default_bluesky_service")]
    pub service: String,
    #[serde(default, with = "duration_serde::option", skip_serializing_if = "Option::is_none")]
    pub inter_post_delay: Option<Duration>,
}

fn default_bluesky_service() -> String {
    DEFAULT_BLUESKY_SERVICE.to_string()
}

impl BlueskyConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            service: default_bluesky_service(),
            inter_post_delay: None,
        }
    }
}

impl fmt::Debug for BlueskyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlueskyConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("service", &self.service)
            .field("inter_post_delay", &self.inter_post_delay)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitterConfig {
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub access_secret: String,
    #[serde(default, with = "duration_serde::option", skip_serializing_if = "Option::is_none")]
    pub inter_post_delay: Option<Duration>,
}

impl TwitterConfig {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        access_token: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            access_token: access_token.into(),
            access_secret: access_secret.into(),
            inter_post_delay: None,
        }
    }
}

impl fmt::Debug for TwitterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterConfig")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("access_secret", &"<redacted>")
            .field("inter_post_delay", &self.inter_post_delay)
            .finish()
    }
}

/// Credentials and endpoint of one backend account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Mastodon(MastodonConfig),
    Bluesky(BlueskyConfig),
    Twitter(TwitterConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> PlatformKind {
        match self {
            Self::Mastodon(_) => PlatformKind::Mastodon,
            Self::Bluesky(_) => PlatformKind::Bluesky,
            Self::Twitter(_) => PlatformKind::Twitter,
        }
    }

    /// Per-backend override of the delay between chained posts
    pub fn inter_post_delay(&self) -> Option<Duration> {
        match self {
            Self::Mastodon(c) => c.inter_post_delay,
            Self::Bluesky(c) => c.inter_post_delay,
            Self::Twitter(c) => c.inter_post_delay,
        }
    }

    /// Non-secret value identifying the account (server, handle or API key)
    pub fn identity(&self) -> &str {
        match self {
            Self::Mastodon(c) => &c.server,
            Self::Bluesky(c) => &c.username,
            Self::Twitter(c) => &c.api_key,
        }
    }

    /// Label used in error outcomes, e.g. `mastodon (https://botsin.space)`
    ///
    /// Only Mastodon-like backends include their server.
    pub fn label(&self) -> String {
        match self {
            Self::Mastodon(c) => format!("{} ({})", self.kind(), c.server),
            _ => self.kind().to_string(),
        }
    }

    /// Expand `$VAR` / `${VAR}` references in every credential field
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` naming the field when a referenced
    /// environment variable is not set.
    pub fn expand_env(&self) -> Result<Self> {
        let expanded = match self {
            Self::Mastodon(c) => Self::Mastodon(MastodonConfig {
                server: expand("mastodon.server", &c.server)?,
                token: expand("mastodon.token", &c.token)?,
                inter_post_delay: c.inter_post_delay,
            }),
            Self::Bluesky(c) => Self::Bluesky(BlueskyConfig {
                username: expand("bluesky.username", &c.username)?,
                password: expand("bluesky.password", &c.password)?,
                service: expand("bluesky.service", &c.service)?,
                inter_post_delay: c.inter_post_delay,
            }),
            Self::Twitter(c) => Self::Twitter(TwitterConfig {
                api_key: expand("twitter.api_key", &c.api_key)?,
                api_secret: expand("twitter.api_secret", &c.api_secret)?,
                access_token: expand("twitter.access_token", &c.access_token)?,
                access_secret: expand("twitter.access_secret", &c.access_secret)?,
                inter_post_delay: c.inter_post_delay,
            }),
        };
        Ok(expanded)
    }
}

fn expand(field: &str, value: &str) -> Result<String> {
    shellexpand::env(value)
        .map(|v| v.into_owned())
        .map_err(|e| ConfigError::MissingField(format!("{} ({})", field, e)).into())
}

impl From<MastodonConfig> for BackendConfig {
    fn from(config: MastodonConfig) -> Self {
        Self::Mastodon(config)
    }
}

impl From<BlueskyConfig> for BackendConfig {
    fn from(config: BlueskyConfig) -> Self {
        Self::Bluesky(config)
    }
}

impl From<TwitterConfig> for BackendConfig {
    fn from(config: TwitterConfig) -> Self {
        Self::Twitter(config)
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// Credential fields are environment-expanded after parsing.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.backends = config
            .backends
            .iter()
            .map(BackendConfig::expand_env)
            .collect::<Result<Vec<_>>>()?;
        Ok(config)
    }
}

/// Path of the configuration file: `$CROSSCAST_CONFIG`, else the XDG config dir
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosscast").join("config.toml"))
}

/// Human-readable durations ("3s", "5m", "250ms") for serde fields
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
