//! Error types for Crosscast

use std::time::Duration;

use thiserror::Error;

use crate::outcome::AggregateFailure;

pub type Result<T> = std::result::Result<T, CrosscastError>;

/// Result type used by platform clients, adapters and the retry wrapper
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[derive(Error, Debug)]
pub enum CrosscastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateFailure),
}

impl CrosscastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosscastError::InvalidInput(_) => 3,
            CrosscastError::Platform(PlatformError::Authentication(_)) => 2,
            CrosscastError::Platform(_) => 1,
            CrosscastError::Config(_) => 1,
            CrosscastError::Aggregate(failure) if failure.credentials_rejected() => 2,
            CrosscastError::Aggregate(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(String),
}

/// Failures of a single backend operation
///
/// Every variant names the operation kind that failed. The message embeds the
/// platform, the operation and whatever detail the remote service returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Failed to read media: {0}")]
    MediaRead(String),

    #[error("Media upload failed: {0}")]
    MediaUpload(String),

    #[error("Media processing timed out: {0}")]
    MediaProcessingTimeout(String),

    #[error("Posting failed: {0}")]
    PostCreation(String),

    #[error("{label} timed out after {}", format_after(.after))]
    Timeout { label: String, after: Duration },
}

fn format_after(after: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = CrosscastError::InvalidInput("Empty content".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = CrosscastError::Platform(PlatformError::Authentication("bad token".into()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_platform_errors() {
        let errors = [
            PlatformError::MediaRead("missing".into()),
            PlatformError::MediaUpload("413".into()),
            PlatformError::MediaProcessingTimeout("m1".into()),
            PlatformError::PostCreation("500".into()),
            PlatformError::Timeout {
                label: "mastodon login".into(),
                after: Duration::from_secs(30),
            },
        ];

        for error in errors {
            assert_eq!(CrosscastError::Platform(error).exit_code(), 1);
        }
    }

    #[test]
    fn test_exit_code_aggregate_failure() {
        let failure = AggregateFailure::new(Vec::new());
        assert_eq!(CrosscastError::Aggregate(failure.clone()).exit_code(), 1);

        let rejected = failure.with_credentials_rejected(true);
        assert_eq!(CrosscastError::Aggregate(rejected).exit_code(), 2);
    }

    #[test]
    fn test_exit_code_config_error() {
        let error = CrosscastError::Config(ConfigError::MissingField("backends".to_string()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_error_message_formatting_authentication() {
        let error = CrosscastError::Platform(PlatformError::Authentication(
            "mastodon verify credentials: HTTP 401".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Platform error: Authentication failed: mastodon verify credentials: HTTP 401"
        );
    }

    #[test]
    fn test_timeout_formatting() {
        let error = PlatformError::Timeout {
            label: "bluesky create post".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(error.to_string(), "bluesky create post timed out after 30s");
    }

    #[test]
    fn test_platform_error_clone() {
        let original = PlatformError::PostCreation("Connection failed".to_string());
        let cloned = original.clone();

        assert_eq!(original, cloned);
    }

    #[test]
    fn test_error_conversion_from_platform_error() {
        let err: CrosscastError = PlatformError::MediaUpload("test".to_string()).into();
        assert!(matches!(err, CrosscastError::Platform(PlatformError::MediaUpload(_))));
    }

    #[test]
    fn test_config_error_read_error_formatting() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let config_error = ConfigError::ReadError(io_error);
        assert!(config_error.to_string().contains("Failed to read config file"));
    }
}
