//! Bluesky platform implementation
//!
//! Uses the AT Protocol XRPC endpoints of the configured PDS. Posts are
//! created with a client-generated record key (a TID), so a retried
//! `createRecord` either writes the same record or finds it already there.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::BlueskyConfig;
use crate::error::{PlatformError, PlatformResult};
use crate::types::ImageMimeType;

use super::http::{payload_bytes, read_json, transport_error, ErrorKind};
use super::{
    MediaHandle, MediaUpload, PlatformClient, PlatformKind, PostRequest, PostRef, PostedMessage,
};

const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Base32 alphabet of AT Protocol timestamp identifiers
const TID_ALPHABET: &[u8; 32] = b"234567abcdefghijklmnopqrstuvwxyz";

/// Bluesky platform client
pub struct BlueskyClient {
    http: reqwest::Client,
    /// PDS base URL (e.g. "https://bsky.social")
    service: String,
    identifier: String,
    password: String,
    session: RwLock<Option<Session>>,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    handle: String,
    did: String,
}

#[derive(Debug, Deserialize)]
struct UploadBlobResponse {
    blob: Value,
}

#[derive(Debug, Deserialize)]
struct RecordRef {
    uri: String,
    cid: String,
}

#[derive(Debug, Deserialize)]
struct ExistingRecord {
    uri: String,
    cid: Option<String>,
    value: Value,
}

impl BlueskyClient {
    pub fn new(http: reqwest::Client, config: &BlueskyConfig) -> Self {
        Self {
            http,
            service: config.service.trim_end_matches('/').to_string(),
            identifier: config.username.clone(),
            password: config.password.clone(),
            session: RwLock::new(None),
        }
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.service, method)
    }

    async fn session(&self, context: &str, kind: ErrorKind) -> PlatformResult<Session> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| kind(format!("{}: not logged in", context)))
    }

    /// Look up a post record written by an earlier attempt
    async fn find_record(&self, session: &Session, rkey: &str) -> Option<ExistingRecord> {
        let response = self
            .http
            .get(self.xrpc("com.atproto.repo.getRecord"))
            .bearer_auth(&session.access_jwt)
            .query(&[
                ("repo", session.did.as_str()),
                ("collection", POST_COLLECTION),
                ("rkey", rkey),
            ])
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }
}

#[async_trait]
impl PlatformClient for BlueskyClient {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Bluesky
    }

    fn new_idempotency_key(&self) -> String {
        next_tid()
    }

    async fn login(&self) -> PlatformResult<()> {
        let context = "bluesky create session";
        let response = self
            .http
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&json!({
                "identifier": self.identifier,
                "password": self.password,
            }))
            .send()
            .await
            .map_err(transport_error(context, PlatformError::Authentication))?;

        let session: Session = read_json(response, context, PlatformError::Authentication).await?;
        debug!("Logged in to {} as {}", self.service, session.handle);
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn upload_media(&self, upload: &MediaUpload) -> PlatformResult<MediaHandle> {
        let context = "bluesky upload blob";
        let session = self.session(context, PlatformError::MediaUpload).await?;
        let bytes = payload_bytes(&upload.payload).await?;
        let mime = ImageMimeType::from_magic_bytes(&bytes)
            .map(|m| m.as_str())
            .unwrap_or("application/octet-stream");

        let response = self
            .http
            .post(self.xrpc("com.atproto.repo.uploadBlob"))
            .bearer_auth(&session.access_jwt)
            .header(CONTENT_TYPE, mime)
            .body(bytes)
            .send()
            .await
            .map_err(transport_error(context, PlatformError::MediaUpload))?;

        let uploaded: UploadBlobResponse =
            read_json(response, context, PlatformError::MediaUpload).await?;

        Ok(MediaHandle {
            id: blob_link(&uploaded.blob).unwrap_or_default(),
            processing: false,
            blob: Some(uploaded.blob),
            caption: upload.caption.clone(),
        })
    }

    async fn create_post(&self, request: &PostRequest) -> PlatformResult<PostedMessage> {
        let context = "bluesky create record";
        let session = self.session(context, PlatformError::PostCreation).await?;
        let created_at = Utc::now();
        let rkey = request.idempotency_key.as_str();

        let response = self
            .http
            .post(self.xrpc("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&json!({
                "repo": session.did,
                "collection": POST_COLLECTION,
                "rkey": rkey,
                "record": build_record(request, created_at),
            }))
            .send()
            .await
            .map_err(transport_error(context, PlatformError::PostCreation))?;

        // A conflict on our own record key means an earlier attempt succeeded
        if response.status().is_client_error() {
            if let Some(existing) = self.find_record(&session, rkey).await {
                debug!("Record {} already exists, reusing it", existing.uri);
                return Ok(existing_into_posted(existing, &session.handle, request, created_at));
            }
        }

        let record: RecordRef = read_json(response, context, PlatformError::PostCreation).await?;

        Ok(into_posted(record, &session.handle, request, created_at))
    }
}

/// Build the `app.bsky.feed.post` record for a request
fn build_record(request: &PostRequest, created_at: DateTime<Utc>) -> Value {
    let mut record = json!({
        "$type": POST_COLLECTION,
        "text": request.text,
        "createdAt": created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    });

    let images: Vec<Value> = request
        .media
        .iter()
        .filter_map(|media| {
            media.blob.as_ref().map(|blob| {
                json!({
                    "alt": media.caption.as_deref().unwrap_or_default(),
                    "image": blob,
                })
            })
        })
        .collect();
    if !images.is_empty() {
        record["embed"] = json!({
            "$type": "app.bsky.embed.images",
            "images": images,
        });
    }

    if let Some(reply) = &request.reply {
        record["reply"] = json!({
            "root": strong_ref(&reply.root),
            "parent": strong_ref(&reply.parent),
        });
    }

    record
}

fn strong_ref(post: &PostRef) -> Value {
    json!({
        "uri": post.id,
        "cid": post.cid.as_deref().unwrap_or_default(),
    })
}

fn blob_link(blob: &Value) -> Option<String> {
    blob.get("ref")
        .and_then(|r| r.get("$link"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn into_posted(
    record: RecordRef,
    handle: &str,
    request: &PostRequest,
    created_at: DateTime<Utc>,
) -> PostedMessage {
    PostedMessage {
        platform: PlatformKind::Bluesky,
        uri: web_url(handle, &record.uri),
        id: record.uri,
        cid: Some(record.cid),
        text: request.text.clone(),
        created_at,
        visibility: None,
    }
}

/// Map a record found by `getRecord` to the post it represents
///
/// The record's own `createdAt` wins over `fallback_created_at`.
fn existing_into_posted(
    existing: ExistingRecord,
    handle: &str,
    request: &PostRequest,
    fallback_created_at: DateTime<Utc>,
) -> PostedMessage {
    let created_at = existing
        .value
        .get("createdAt")
        .and_then(Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(fallback_created_at);
    let record = RecordRef {
        uri: existing.uri,
        cid: existing.cid.unwrap_or_default(),
    };
    into_posted(record, handle, request, created_at)
}

/// Public bsky.app URL of a post, from its `at://` URI
pub fn web_url(handle: &str, at_uri: &str) -> String {
    let rkey = at_uri.rsplit('/').next().unwrap_or(at_uri);
    format!("https://bsky.app/profile/{}/post/{}", handle, rkey)
}

/// Generate a timestamp identifier
///
/// 13 base32-sortable characters encoding microseconds since the Unix epoch
/// and a random 10-bit clock identifier.
pub fn next_tid() -> String {
    let micros = u64::try_from(Utc::now().timestamp_micros()).unwrap_or_default();
    let random = uuid::Uuid::new_v4();
    let clock_id = u64::from(u16::from_le_bytes([random.as_bytes()[0], random.as_bytes()[1]]));
    encode_tid(micros, clock_id)
}

fn encode_tid(micros: u64, clock_id: u64) -> String {
    let value = ((micros & ((1 << 53) - 1)) << 10) | (clock_id & 0x3FF);
    (0..13)
        .rev()
        .map(|i| TID_ALPHABET[((value >> (i * 5)) & 0x1F) as usize] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::ReplyTarget;
    use chrono::TimeZone;

    fn request() -> PostRequest {
        PostRequest {
            text: "hello sky".to_string(),
            media: Vec::new(),
            reply: None,
            visibility: None,
            idempotency_key: "3kfzsyqtm2c2a".to_string(),
        }
    }

    #[test]
    fn test_tid_format() {
        let tid = next_tid();
        assert_eq!(tid.len(), 13);
        assert!(tid.bytes().all(|b| TID_ALPHABET.contains(&b)));
        // The top bit is always zero
        assert!(b"234567ab".contains(&tid.as_bytes()[0]));
    }

    #[test]
    fn test_tids_sort_by_time() {
        let before = u64::try_from(Utc::now().timestamp_micros()).unwrap();
        let tid = next_tid();

        // Clock ids only break ties within the same microsecond
        assert!(encode_tid(before - 1, 0x3FF) < tid);
        assert!(tid < encode_tid(before + 60_000_000, 0));
        assert!(encode_tid(5, 0x3FF) < encode_tid(6, 0));
    }

    #[test]
    fn test_encode_tid_known_values() {
        assert_eq!(encode_tid(0, 0), "2222222222222");
        assert_eq!(encode_tid(0, 1), "2222222222223");
        assert_eq!(encode_tid(1, 0), "2222222222322");
    }

    #[test]
    fn test_web_url_from_at_uri() {
        assert_eq!(
            web_url(
                "alice.bsky.social",
                "at://did:plc:abc123/app.bsky.feed.post/3kfzsyqtm2c2a"
            ),
            "https://bsky.app/profile/alice.bsky.social/post/3kfzsyqtm2c2a"
        );
    }

    #[test]
    fn test_record_without_media_or_reply() {
        let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let record = build_record(&request(), created_at);

        assert_eq!(record["$type"], "app.bsky.feed.post");
        assert_eq!(record["text"], "hello sky");
        assert_eq!(record["createdAt"], "2024-03-01T12:00:00.000Z");
        assert!(record.get("embed").is_none());
        assert!(record.get("reply").is_none());
    }

    #[test]
    fn test_record_with_images_and_reply() {
        let blob = json!({
            "$type": "blob",
            "ref": {"$link": "bafkreiabc"},
            "mimeType": "image/png",
            "size": 1234
        });
        let mut request = request();
        request.media = vec![
            MediaHandle {
                id: "bafkreiabc".to_string(),
                processing: false,
                blob: Some(blob.clone()),
                caption: Some("a cat".to_string()),
            },
            MediaHandle {
                id: "bafkreidef".to_string(),
                processing: false,
                blob: Some(blob.clone()),
                caption: None,
            },
        ];
        request.reply = Some(ReplyTarget {
            parent: PostRef {
                id: "at://did:plc:abc/app.bsky.feed.post/2".to_string(),
                cid: Some("cid2".to_string()),
            },
            root: PostRef {
                id: "at://did:plc:abc/app.bsky.feed.post/1".to_string(),
                cid: Some("cid1".to_string()),
            },
        });

        let record = build_record(&request, Utc::now());

        assert_eq!(record["embed"]["$type"], "app.bsky.embed.images");
        assert_eq!(record["embed"]["images"][0]["alt"], "a cat");
        assert_eq!(record["embed"]["images"][0]["image"], blob);
        assert_eq!(record["embed"]["images"][1]["alt"], "");
        assert_eq!(record["reply"]["root"]["cid"], "cid1");
        assert_eq!(record["reply"]["parent"]["uri"], "at://did:plc:abc/app.bsky.feed.post/2");
    }

    #[test]
    fn test_blob_link() {
        let blob = json!({"ref": {"$link": "bafkreiabc"}});
        assert_eq!(blob_link(&blob).as_deref(), Some("bafkreiabc"));
        assert_eq!(blob_link(&json!({})), None);
    }

    #[test]
    fn test_posted_message_from_record() {
        let record = RecordRef {
            uri: "at://did:plc:abc/app.bsky.feed.post/3kfzsyqtm2c2a".to_string(),
            cid: "bafyrei".to_string(),
        };
        let posted = into_posted(record, "alice.bsky.social", &request(), Utc::now());

        assert_eq!(posted.id, "at://did:plc:abc/app.bsky.feed.post/3kfzsyqtm2c2a");
        assert_eq!(posted.cid.as_deref(), Some("bafyrei"));
        assert_eq!(
            posted.uri,
            "https://bsky.app/profile/alice.bsky.social/post/3kfzsyqtm2c2a"
        );
        assert_eq!(posted.post_ref().cid.as_deref(), Some("bafyrei"));
    }

    #[test]
    fn test_existing_record_reused_as_post() {
        let existing: ExistingRecord = serde_json::from_value(json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/3kfzsyqtm2c2a",
            "cid": "bafyexisting",
            "value": {
                "$type": "app.bsky.feed.post",
                "text": "hello sky",
                "createdAt": "2024-03-01T12:00:00.000Z"
            }
        }))
        .unwrap();
        let fallback = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap();

        let posted = existing_into_posted(existing, "alice.bsky.social", &request(), fallback);

        assert_eq!(posted.id, "at://did:plc:abc/app.bsky.feed.post/3kfzsyqtm2c2a");
        assert_eq!(posted.cid.as_deref(), Some("bafyexisting"));
        assert_eq!(
            posted.uri,
            "https://bsky.app/profile/alice.bsky.social/post/3kfzsyqtm2c2a"
        );
        assert_eq!(posted.text, "hello sky");
        assert_eq!(
            posted.created_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_existing_record_without_timestamp_uses_fallback() {
        let existing: ExistingRecord = serde_json::from_value(json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/3kfzsyqtm2c2a",
            "value": {}
        }))
        .unwrap();
        let fallback = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap();

        let posted = existing_into_posted(existing, "alice.bsky.social", &request(), fallback);

        assert_eq!(posted.created_at, fallback);
        assert_eq!(posted.cid.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_upload_requires_session() {
        let client = BlueskyClient::new(
            reqwest::Client::new(),
            &BlueskyConfig::new("alice.bsky.social", "pw"),
        );
        let upload = MediaUpload {
            payload: crate::platforms::MediaPayload::Bytes(vec![1, 2, 3]),
            caption: None,
            focus: None,
        };

        let result = client.upload_media(&upload).await;
        assert!(matches!(result, Err(PlatformError::MediaUpload(_))));
    }
}
