//! Twitter platform implementation
//!
//! Requests are signed with OAuth 1.0a (HMAC-SHA1) user-context credentials.
//! Media goes through the v1.1 upload endpoint as base64 `media_data`, alt
//! text through a separate metadata call, and tweets through API v2.
//!
//! Twitter has no idempotency keys. A create that is retried after the server
//! already accepted it comes back as a duplicate rejection, which is reported
//! as such.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::Form;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha1::Sha1;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::TwitterConfig;
use crate::error::{PlatformError, PlatformResult};

use super::http::{check_status, payload_bytes, read_json, status_detail, transport_error};
use super::{
    MediaHandle, MediaUpload, PlatformClient, PlatformKind, PostRequest, PostedMessage,
};

const API_URL: &str = "https://api.twitter.com";
const UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";
const METADATA_URL: &str = "https://upload.twitter.com/1.1/media/metadata/create.json";

/// OAuth 1.0a user-context credentials
#[derive(Clone)]
struct OAuthCredentials {
    consumer_key: String,
    consumer_secret: String,
    token: String,
    token_secret: String,
}

/// Twitter platform client
pub struct TwitterClient {
    http: reqwest::Client,
    credentials: OAuthCredentials,
    /// Screen name confirmed by the last successful login
    username: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct User {
    username: String,
}

#[derive(Debug, Deserialize)]
struct UploadedMedia {
    media_id_string: String,
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

#[derive(Debug, Deserialize)]
struct ProcessingInfo {
    state: String,
}

impl ProcessingInfo {
    fn pending(&self) -> bool {
        matches!(self.state.as_str(), "pending" | "in_progress")
    }
}

#[derive(Debug, Serialize)]
struct CreateTweet<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<TweetReply<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<TweetMedia<'a>>,
}

#[derive(Debug, Serialize)]
struct TweetReply<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Debug, Serialize)]
struct TweetMedia<'a> {
    media_ids: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
}

impl TwitterClient {
    pub fn new(http: reqwest::Client, config: &TwitterConfig) -> Self {
        Self {
            http,
            credentials: OAuthCredentials {
                consumer_key: config.api_key.clone(),
                consumer_secret: config.api_secret.clone(),
                token: config.access_token.clone(),
                token_secret: config.access_secret.clone(),
            },
            username: RwLock::new(None),
        }
    }

    /// Build a request carrying a fresh OAuth signature
    ///
    /// `params` are the query parameters of the request; they take part in
    /// the signature. JSON and multipart bodies do not.
    fn signed(&self, method: Method, url: &str, params: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let header = authorization_header(
            &self.credentials,
            method.as_str(),
            url,
            params,
            &uuid::Uuid::new_v4().simple().to_string(),
            unix_timestamp(),
        );

        let builder = self.http.request(method, url).header(AUTHORIZATION, header);
        if params.is_empty() {
            builder
        } else {
            builder.query(params)
        }
    }

    async fn username(&self, context: &str) -> PlatformResult<String> {
        self.username
            .read()
            .await
            .clone()
            .ok_or_else(|| PlatformError::PostCreation(format!("{}: not logged in", context)))
    }

}

#[async_trait]
impl PlatformClient for TwitterClient {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Twitter
    }

    async fn login(&self) -> PlatformResult<()> {
        let context = "twitter verify credentials";
        let url = format!("{}/2/users/me", API_URL);
        let response = self
            .signed(Method::GET, &url, &[])
            .send()
            .await
            .map_err(transport_error(context, PlatformError::Authentication))?;

        let user: Envelope<User> = read_json(response, context, PlatformError::Authentication).await?;
        debug!("Logged in to twitter as {}", user.data.username);
        *self.username.write().await = Some(user.data.username);
        Ok(())
    }

    async fn upload_media(&self, upload: &MediaUpload) -> PlatformResult<MediaHandle> {
        let context = "twitter media upload";
        let bytes = payload_bytes(&upload.payload).await?;
        let form = Form::new().text("media_data", BASE64.encode(bytes));

        let response = self
            .signed(Method::POST, UPLOAD_URL, &[])
            .multipart(form)
            .send()
            .await
            .map_err(transport_error(context, PlatformError::MediaUpload))?;

        let media: UploadedMedia = read_json(response, context, PlatformError::MediaUpload).await?;

        Ok(MediaHandle {
            processing: media.processing_info.as_ref().is_some_and(ProcessingInfo::pending),
            id: media.media_id_string,
            blob: None,
            caption: upload.caption.clone(),
        })
    }

    async fn check_media(&self, handle: &MediaHandle) -> PlatformResult<MediaHandle> {
        let context = "twitter media status";
        let params = [("command", "STATUS"), ("media_id", handle.id.as_str())];
        let response = self
            .signed(Method::GET, UPLOAD_URL, &params)
            .send()
            .await
            .map_err(transport_error(context, PlatformError::MediaUpload))?;

        let media: UploadedMedia = read_json(response, context, PlatformError::MediaUpload).await?;
        if let Some(info) = &media.processing_info {
            if info.state == "failed" {
                return Err(PlatformError::MediaUpload(format!(
                    "{}: processing of media {} failed",
                    context, handle.id
                )));
            }
        }

        Ok(MediaHandle {
            processing: media.processing_info.as_ref().is_some_and(ProcessingInfo::pending),
            ..handle.clone()
        })
    }

    async fn describe_media(&self, handle: &MediaHandle) -> PlatformResult<()> {
        let context = "twitter media metadata";
        let caption = handle.caption.as_deref().unwrap_or_default();
        let response = self
            .signed(Method::POST, METADATA_URL, &[])
            .json(&json!({
                "media_id": handle.id,
                "alt_text": { "text": caption },
            }))
            .send()
            .await
            .map_err(transport_error(context, PlatformError::MediaUpload))?;

        check_status(response, context, PlatformError::MediaUpload).await?;
        Ok(())
    }

    async fn create_post(&self, request: &PostRequest) -> PlatformResult<PostedMessage> {
        let context = "twitter create tweet";
        let username = self.username(context).await?;
        let url = format!("{}/2/tweets", API_URL);

        let response = self
            .signed(Method::POST, &url, &[])
            .json(&tweet_body(request))
            .send()
            .await
            .map_err(transport_error(context, PlatformError::PostCreation))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(rejected_tweet(context, status.as_u16(), &body));
        }
        let tweet: Envelope<Tweet> = read_json(response, context, PlatformError::PostCreation).await?;

        Ok(PostedMessage {
            platform: PlatformKind::Twitter,
            uri: status_url(&username, &tweet.data.id),
            id: tweet.data.id,
            cid: None,
            text: tweet.data.text,
            created_at: Utc::now(),
            visibility: None,
        })
    }
}

fn tweet_body(request: &PostRequest) -> CreateTweet<'_> {
    CreateTweet {
        text: &request.text,
        reply: request.reply.as_ref().map(|r| TweetReply {
            in_reply_to_tweet_id: &r.parent.id,
        }),
        media: (!request.media.is_empty()).then(|| TweetMedia {
            media_ids: request.media.iter().map(|m| m.id.as_str()).collect(),
        }),
    }
}

/// Error for a tweet the API refused
///
/// Duplicate rejections note that an earlier attempt may have been accepted
/// after its response was lost.
fn rejected_tweet(context: &str, status: u16, body: &str) -> PlatformError {
    let detail = status_detail(context, status, body);
    if is_duplicate_rejection(status, body) {
        PlatformError::PostCreation(format!(
            "{} (the tweet may already exist from an earlier attempt)",
            detail
        ))
    } else {
        PlatformError::PostCreation(detail)
    }
}

/// Whether Twitter refused a tweet as a duplicate of an existing one
///
/// v1.1 reports error code 187; v2 answers 403 with a detail mentioning
/// duplicate content.
fn is_duplicate_rejection(status: u16, body: &str) -> bool {
    if status != 403 {
        return false;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_lowercase().contains("duplicate");
    };

    let coded = value
        .get("errors")
        .and_then(|e| e.as_array())
        .is_some_and(|errors| {
            errors
                .iter()
                .any(|e| e.get("code").and_then(|c| c.as_u64()) == Some(187))
        });
    coded
        || value
            .get("detail")
            .and_then(|d| d.as_str())
            .is_some_and(|d| d.to_lowercase().contains("duplicate"))
}

/// Canonical URL of a tweet
pub fn status_url(screen_name: &str, id: &str) -> String {
    format!("https://twitter.com/{}/status/{}", screen_name, id)
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Compute the OAuth 1.0a HMAC-SHA1 signature of a request
///
/// `params` holds every query and form parameter, unencoded; the `oauth_*`
/// protocol parameters are added here.
fn signature(
    credentials: &OAuthCredentials,
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    nonce: &str,
    timestamp: u64,
) -> String {
    let timestamp = timestamp.to_string();
    let protocol = oauth_params(credentials, nonce, &timestamp);

    let mut encoded: Vec<(String, String)> = params
        .iter()
        .chain(protocol.iter())
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let parameter_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let base = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&parameter_string)
    );
    let key = format!(
        "{}&{}",
        percent_encode(&credentials.consumer_secret),
        percent_encode(&credentials.token_secret)
    );

    // HMAC accepts keys of any length
    let mut mac = match Hmac::<Sha1>::new_from_slice(key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(base.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn oauth_params<'a>(
    credentials: &'a OAuthCredentials,
    nonce: &'a str,
    timestamp: &'a str,
) -> [(&'a str, &'a str); 6] {
    [
        ("oauth_consumer_key", credentials.consumer_key.as_str()),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp),
        ("oauth_token", credentials.token.as_str()),
        ("oauth_version", "1.0"),
    ]
}

/// Build the `Authorization: OAuth ...` header value for a request
fn authorization_header(
    credentials: &OAuthCredentials,
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    nonce: &str,
    timestamp: u64,
) -> String {
    let signature = signature(credentials, method, url, params, nonce, timestamp);
    let timestamp = timestamp.to_string();

    let mut fields: Vec<(&str, &str)> = oauth_params(credentials, nonce, &timestamp).to_vec();
    fields.push(("oauth_signature", signature.as_str()));
    fields.sort();

    let fields = fields
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth {}", fields)
}
