//! Payload types carried inside events and HTTP responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Public view of a user, safe to send to any authenticated client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Avatar URL, empty when unset.
    pub avatar: String,
    /// Whether the user currently has a live connection.
    pub is_online: bool,
    /// Last time the user was seen, unix milliseconds.
    pub last_seen: i64,
    /// Free-form status line.
    pub status: String,
}

/// Minimal user reference embedded in messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Avatar URL.
    pub avatar: String,
}

/// Conversation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    /// Exactly two participants.
    Private,
    /// Any number of participants.
    Group,
}

impl ChatType {
    /// Storage and wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for ChatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown chat type: {other}")),
        }
    }
}

/// Message content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
    /// Image attachment.
    Image,
    /// Generic file attachment.
    File,
    /// Audio attachment.
    Audio,
    /// Video attachment.
    Video,
}

impl MessageType {
    /// Storage and wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Whether this kind refers to an uploaded file.
    pub fn is_attachment(&self) -> bool {
        !matches!(self, Self::Text)
    }

    /// Classify an upload by its MIME type.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("video/") {
            Self::Video
        } else {
            Self::File
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// One read receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// Reader.
    pub user_id: String,
    /// When the message was read, unix milliseconds.
    pub read_at: i64,
}

/// One reaction. A user holds at most one reaction per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    /// Reacting user.
    pub user_id: String,
    /// Emoji text.
    pub emoji: String,
    /// When the reaction was set, unix milliseconds.
    pub created_at: i64,
}

/// Direction of a reaction change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    /// Reaction set or replaced.
    Add,
    /// Reaction removed.
    Remove,
}

/// A stored message as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    /// Message id.
    pub id: String,
    /// Owning conversation.
    pub chat_id: String,
    /// Author.
    pub sender: UserRef,
    /// Content kind.
    pub message_type: MessageType,
    /// Text content, or caption / file name for attachments.
    pub content: String,
    /// Attachment URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Original attachment name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Attachment size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    /// Message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Read receipts, one per reader.
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    /// Reactions, one per user.
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    /// Whether the content has been edited.
    pub is_edited: bool,
    /// When the content was last edited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
    /// Creation time, unix milliseconds.
    pub created_at: i64,
}

/// Minimal conversation info attached to `new_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    /// Conversation id.
    pub id: String,
    /// Participant user ids.
    pub participants: Vec<String>,
    /// Last activity, unix milliseconds.
    pub last_activity: i64,
}

/// Full conversation view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    /// Conversation id.
    pub id: String,
    /// Private or group.
    pub chat_type: ChatType,
    /// Display name (groups only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    /// Participant profiles.
    pub participants: Vec<PublicProfile>,
    /// Creator user id.
    pub created_by: String,
    /// Most recent message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageView>,
    /// Last activity, unix milliseconds.
    pub last_activity: i64,
    /// Whether the conversation is visible.
    pub is_active: bool,
}
