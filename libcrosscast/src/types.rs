//! Core types for Crosscast

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CrosscastError, Result};

/// Visibility of a created post
///
/// Only Mastodon-like backends honour visibility; the others ignore it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = CrosscastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "unlisted" => Ok(Self::Unlisted),
            "private" => Ok(Self::Private),
            "direct" => Ok(Self::Direct),
            _ => Err(CrosscastError::InvalidInput(format!(
                "Invalid visibility: '{}'. Valid options: public, unlisted, private, direct",
                s
            ))),
        }
    }
}

/// Focal point of an image, both coordinates within `[-1.0, 1.0]`
///
/// Serialized as the comma-delimited `"x,y"` form Mastodon expects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Focus {
    x: f64,
    y: f64,
}

impl Focus {
    pub fn new(x: f64, y: f64) -> Result<Self> {
        let in_range = |v: f64| (-1.0..=1.0).contains(&v);
        if !in_range(x) || !in_range(y) {
            return Err(CrosscastError::InvalidInput(format!(
                "Focus ({}, {}) must lie within [-1.0, 1.0] on both axes",
                x, y
            )));
        }
        Ok(Self { x, y })
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for Focus {
    type Err = CrosscastError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CrosscastError::InvalidInput(format!("Invalid focus: '{}'", s));
        let (x, y) = s.split_once(',').ok_or_else(invalid)?;
        let x = x.trim().parse::<f64>().map_err(|_| invalid())?;
        let y = y.trim().parse::<f64>().map_err(|_| invalid())?;
        Self::new(x, y)
    }
}

impl TryFrom<String> for Focus {
    type Error = CrosscastError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Focus> for String {
    fn from(focus: Focus) -> Self {
        focus.to_string()
    }
}

/// Where an attachment's data comes from
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentSource {
    /// Path to the media file on disk
    Path(PathBuf),
    /// Media bytes held in memory
    Bytes(Vec<u8>),
}

impl fmt::Debug for AttachmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes(<{} bytes>)", bytes.len()),
        }
    }
}

/// A media attachment for a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(flatten)]
    pub source: AttachmentSource,
    /// Image description, for accessibility
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<Focus>,
}

impl Attachment {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: AttachmentSource::Path(path.into()),
            caption: None,
            focus: None,
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source: AttachmentSource::Bytes(bytes.into()),
            caption: None,
            focus: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_focus(mut self, focus: Focus) -> Self {
        self.focus = Some(focus);
        self
    }

    /// Path of the attachment, if it refers to a file
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            AttachmentSource::Path(path) => Some(path),
            AttachmentSource::Bytes(_) => None,
        }
    }
}

/// One logical message to post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: Vec::new(),
            visibility: None,
        }
    }

    pub fn with_media(mut self, attachment: Attachment) -> Self {
        self.media.push(attachment);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// The message argument of a crosspost call
///
/// A single message is posted on its own; a list is posted as a reply chain.
/// The mode applies to every backend of the call.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageInput {
    Single(Message),
    Chain(Vec<Message>),
}

impl MessageInput {
    pub fn is_chain(&self) -> bool {
        matches!(self, Self::Chain(_))
    }
}

impl From<Message> for MessageInput {
    fn from(message: Message) -> Self {
        Self::Single(message)
    }
}

impl From<&str> for MessageInput {
    fn from(text: &str) -> Self {
        Self::Single(Message::new(text))
    }
}

impl From<String> for MessageInput {
    fn from(text: String) -> Self {
        Self::Single(Message::new(text))
    }
}

impl From<Vec<Message>> for MessageInput {
    fn from(messages: Vec<Message>) -> Self {
        Self::Chain(messages)
    }
}

impl From<Vec<&str>> for MessageInput {
    fn from(texts: Vec<&str>) -> Self {
        Self::Chain(texts.into_iter().map(Message::from).collect())
    }
}

impl From<Vec<String>> for MessageInput {
    fn from(texts: Vec<String>) -> Self {
        Self::Chain(texts.into_iter().map(Message::from).collect())
    }
}

// ============================================================================
// Media Types
// ============================================================================

/// Supported image MIME types for attachments
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageMimeType {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageMimeType {
    /// Detect MIME type from the leading bytes of the file content
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        match data {
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [0x89, b'P', b'N', b'G', ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::WebP),
            _ => None,
        }
    }

    /// Get the MIME type string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }

    /// Get the typical file extension for this MIME type
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }
}

impl fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
