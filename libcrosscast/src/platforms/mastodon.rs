//! Mastodon platform implementation
//!
//! Talks to the Mastodon REST API directly, so it works with any server that
//! implements it (Mastodon, GoToSocial, Akkoma, Pleroma). Statuses are created
//! with an `Idempotency-Key` header, which makes a retried create return the
//! original status instead of a duplicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MastodonConfig;
use crate::error::{PlatformError, PlatformResult};
use crate::types::{ImageMimeType, Visibility};

use super::http::{read_json, transport_error};
use super::{
    MediaHandle, MediaInput, MediaPayload, MediaUpload, PlatformClient, PlatformKind,
    PostRequest, PostedMessage,
};

/// Mastodon platform client
pub struct MastodonClient {
    http: reqwest::Client,
    /// Server base URL without trailing slash (e.g. "https://mastodon.social")
    server: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct Account {
    acct: String,
}

#[derive(Debug, Deserialize)]
struct MediaAttachment {
    id: String,
    /// Null while the server is still processing the upload
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateStatus<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media_ids: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to_id: Option<&'a str>,
    visibility: Visibility,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    uri: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    visibility: Option<Visibility>,
}

impl MastodonClient {
    pub fn new(http: reqwest::Client, config: &MastodonConfig) -> Self {
        Self {
            http,
            server: config.server_url(),
            token: config.token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    async fn media_part(payload: &MediaPayload) -> PlatformResult<Part> {
        let (bytes, file_name) = match payload {
            MediaPayload::File(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    PlatformError::MediaRead(format!("{}: {}", path.display(), e))
                })?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".to_string());
                (bytes, name)
            }
            MediaPayload::Bytes(bytes) => (bytes.clone(), "upload".to_string()),
        };

        let mime = ImageMimeType::from_magic_bytes(&bytes);
        let part = Part::bytes(bytes).file_name(file_name);
        match mime {
            Some(mime) => part
                .mime_str(mime.as_str())
                .map_err(|e| PlatformError::MediaUpload(format!("mastodon media upload: {}", e))),
            None => Ok(part),
        }
    }
}

#[async_trait]
impl PlatformClient for MastodonClient {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Mastodon
    }

    fn media_input(&self) -> MediaInput {
        MediaInput::File
    }

    async fn login(&self) -> PlatformResult<()> {
        let context = "mastodon verify credentials";
        let response = self
            .http
            .get(self.url("/api/v1/accounts/verify_credentials"))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error(context, PlatformError::Authentication))?;

        let account: Account = read_json(response, context, PlatformError::Authentication).await?;
        debug!("Logged in to {} as {}", self.server, account.acct);
        Ok(())
    }

    async fn upload_media(&self, upload: &MediaUpload) -> PlatformResult<MediaHandle> {
        let context = "mastodon media upload";
        let mut form = Form::new().part("file", Self::media_part(&upload.payload).await?);
        if let Some(caption) = &upload.caption {
            form = form.text("description", caption.clone());
        }
        if let Some(focus) = &upload.focus {
            form = form.text("focus", focus.to_string());
        }

        let response = self
            .http
            .post(self.url("/api/v2/media"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error(context, PlatformError::MediaUpload))?;

        // 202 Accepted means the server is still processing the file
        let accepted = response.status() == StatusCode::ACCEPTED;
        let media: MediaAttachment = read_json(response, context, PlatformError::MediaUpload).await?;

        Ok(MediaHandle {
            processing: accepted || media.url.is_none(),
            id: media.id,
            blob: None,
            caption: upload.caption.clone(),
        })
    }

    async fn check_media(&self, handle: &MediaHandle) -> PlatformResult<MediaHandle> {
        let context = "mastodon media status";
        let response = self
            .http
            .get(self.url(&format!("/api/v1/media/{}", handle.id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error(context, PlatformError::MediaUpload))?;

        // 206 Partial Content means processing has not finished
        let pending = response.status() == StatusCode::PARTIAL_CONTENT;
        let media: MediaAttachment = read_json(response, context, PlatformError::MediaUpload).await?;

        Ok(MediaHandle {
            processing: pending || media.url.is_none(),
            ..handle.clone()
        })
    }

    async fn create_post(&self, request: &PostRequest) -> PlatformResult<PostedMessage> {
        let context = "mastodon create status";
        let body = status_body(request);

        let response = self
            .http
            .post(self.url("/api/v1/statuses"))
            .bearer_auth(&self.token)
            .header("Idempotency-Key", request.idempotency_key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(transport_error(context, PlatformError::PostCreation))?;

        let status: Status = read_json(response, context, PlatformError::PostCreation).await?;

        Ok(into_posted(status, request))
    }
}

/// Replies point at the parent status; Mastodon derives the thread itself
fn status_body(request: &PostRequest) -> CreateStatus<'_> {
    CreateStatus {
        status: &request.text,
        media_ids: request.media.iter().map(|m| m.id.as_str()).collect(),
        in_reply_to_id: request.reply.as_ref().map(|r| r.parent.id.as_str()),
        visibility: request.visibility.unwrap_or_default(),
    }
}

fn into_posted(status: Status, request: &PostRequest) -> PostedMessage {
    PostedMessage {
        platform: PlatformKind::Mastodon,
        id: status.id,
        cid: None,
        uri: status.uri,
        // `text` is only returned for deleted or scheduled statuses
        text: status
            .text
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| request.text.clone()),
        created_at: status.created_at,
        visibility: Some(
            status
                .visibility
                .unwrap_or_else(|| request.visibility.unwrap_or_default()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{PostRef, ReplyTarget};

    fn request() -> PostRequest {
        PostRequest {
            text: "Hello fediverse".to_string(),
            media: vec![MediaHandle::ready("m1"), MediaHandle::ready("m2")],
            reply: Some(ReplyTarget {
                parent: PostRef {
                    id: "109".to_string(),
                    cid: None,
                },
                root: PostRef {
                    id: "100".to_string(),
                    cid: None,
                },
            }),
            visibility: Some(Visibility::Unlisted),
            idempotency_key: "key-1".to_string(),
        }
    }

    #[test]
    fn test_create_status_body() {
        let request = request();
        let json = serde_json::to_value(status_body(&request)).unwrap();
        assert_eq!(json["status"], "Hello fediverse");
        assert_eq!(json["media_ids"], serde_json::json!(["m1", "m2"]));
        assert_eq!(json["in_reply_to_id"], "109");
        assert_eq!(json["visibility"], "unlisted");
    }

    #[test]
    fn test_create_status_body_omits_empty_fields() {
        let request = PostRequest {
            text: "plain".to_string(),
            media: Vec::new(),
            reply: None,
            visibility: None,
            idempotency_key: "key-2".to_string(),
        };

        let json = serde_json::to_value(status_body(&request)).unwrap();
        assert_eq!(json["status"], "plain");
        assert!(json.get("media_ids").is_none());
        assert!(json.get("in_reply_to_id").is_none());
        assert_eq!(json["visibility"], "public");
    }

    #[test]
    fn test_status_response_into_posted() {
        let status: Status = serde_json::from_str(
            r#"{
                "id": "110",
                "uri": "https://botsin.space/users/bot/statuses/110",
                "url": "https://botsin.space/@bot/110",
                "created_at": "2024-03-01T12:00:00.000Z",
                "content": "<p>Hello fediverse</p>",
                "text": null,
                "visibility": "unlisted"
            }"#,
        )
        .unwrap();

        let posted = into_posted(status, &request());
        assert_eq!(posted.id, "110");
        assert_eq!(posted.uri, "https://botsin.space/users/bot/statuses/110");
        assert_eq!(posted.text, "Hello fediverse");
        assert_eq!(posted.visibility, Some(Visibility::Unlisted));
    }

    #[test]
    fn test_media_attachment_pending_has_no_url() {
        let media: MediaAttachment =
            serde_json::from_str(r#"{"id":"22","type":"video","url":null}"#).unwrap();
        assert!(media.url.is_none());
    }

    #[test]
    fn test_client_uses_normalized_server() {
        let client = MastodonClient::new(
            reqwest::Client::new(),
            &MastodonConfig::new("botsin.space/", "token"),
        );
        assert_eq!(
            client.url("/api/v1/statuses"),
            "https://botsin.space/api/v1/statuses"
        );
        assert_eq!(client.media_input(), MediaInput::File);
    }

    #[tokio::test]
    async fn test_media_part_missing_file_is_read_error() {
        let payload = MediaPayload::File("/nonexistent/upload.png".into());
        let result = MastodonClient::media_part(&payload).await;
        assert!(matches!(result, Err(PlatformError::MediaRead(_))));
    }
}
