//! Client and server events.
//!
//! Both directions use the same envelope: `event` names the variant and
//! `data` carries its payload. Variant names are snake_case, payload fields
//! camelCase.

use crate::error::{ProtoError, Result};
use crate::model::{ChatSummary, ChatView, MessageType, MessageView, PublicProfile, ReactionAction};
use serde::{Deserialize, Serialize};

/// Events a client may send over its connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Open a conversation: join its room and mark it read.
    JoinChat {
        /// Conversation id.
        chat_id: String,
    },
    /// Close a conversation for this connection.
    LeaveChat {
        /// Conversation id.
        chat_id: String,
    },
    /// Post a new message.
    SendMessage {
        /// Conversation id.
        chat_id: String,
        /// Text content.
        content: String,
        /// Content kind, text when omitted.
        #[serde(default)]
        message_type: MessageType,
        /// Attachment URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        /// Attachment name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        /// Attachment size in bytes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_size: Option<i64>,
        /// Message being replied to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },
    /// Replace the content of one of the sender's messages.
    EditMessage {
        /// Message id.
        message_id: String,
        /// New content.
        content: String,
    },
    /// Start typing indicator.
    TypingStart {
        /// Conversation id.
        chat_id: String,
    },
    /// Stop typing indicator.
    TypingStop {
        /// Conversation id.
        chat_id: String,
    },
    /// Set or replace the sender's reaction on a message.
    AddReaction {
        /// Message id.
        message_id: String,
        /// Emoji text.
        emoji: String,
    },
    /// Drop the sender's reaction on a message.
    RemoveReaction {
        /// Message id.
        message_id: String,
    },
    /// Soft-delete one of the sender's messages.
    DeleteMessage {
        /// Message id.
        message_id: String,
    },
}

const CLIENT_EVENT_NAMES: &[&str] = &[
    "join_chat",
    "leave_chat",
    "send_message",
    "edit_message",
    "typing_start",
    "typing_stop",
    "add_reaction",
    "remove_reaction",
    "delete_message",
];

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(borrow)]
    event: &'a str,
}

impl ClientEvent {
    /// Decode a text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        let envelope: Envelope<'_> = serde_json::from_str(text)?;
        if !CLIENT_EVENT_NAMES.contains(&envelope.event) {
            return Err(ProtoError::UnknownEvent(envelope.event.to_string()));
        }
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinChat { .. } => "join_chat",
            Self::LeaveChat { .. } => "leave_chat",
            Self::SendMessage { .. } => "send_message",
            Self::EditMessage { .. } => "edit_message",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::AddReaction { .. } => "add_reaction",
            Self::RemoveReaction { .. } => "remove_reaction",
            Self::DeleteMessage { .. } => "delete_message",
        }
    }
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Snapshot of everyone online, sent once after connect.
    OnlineUsers(Vec<PublicProfile>),
    /// A user came online.
    UserOnline {
        /// User id.
        user_id: String,
        /// Profile snapshot.
        user: PublicProfile,
    },
    /// A user went offline.
    UserOffline {
        /// User id.
        user_id: String,
        /// Disconnect time, unix milliseconds.
        last_seen: i64,
    },
    /// A message was posted.
    NewMessage {
        /// The stored message.
        message: MessageView,
        /// Conversation info after the update.
        chat: ChatSummary,
    },
    /// A message was edited.
    MessageEdited {
        /// The message after the edit.
        message: MessageView,
    },
    /// A participant read the conversation.
    MessagesRead {
        /// Conversation id.
        chat_id: String,
        /// Reader.
        user_id: String,
    },
    /// A participant started typing.
    UserTyping {
        /// Typist.
        user_id: String,
        /// Typist display name.
        user_name: String,
        /// Conversation id.
        chat_id: String,
    },
    /// A participant stopped typing.
    UserStopTyping {
        /// Typist.
        user_id: String,
        /// Conversation id.
        chat_id: String,
    },
    /// A reaction was set or removed.
    MessageReaction {
        /// Message id.
        message_id: String,
        /// Reacting user.
        user_id: String,
        /// Emoji, absent on removal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emoji: Option<String>,
        /// Add or remove.
        action: ReactionAction,
    },
    /// A message was soft-deleted.
    MessageDeleted {
        /// Message id.
        message_id: String,
        /// Conversation id.
        chat_id: String,
    },
    /// A group conversation including the recipient was created.
    GroupCreated {
        /// The new conversation.
        chat: ChatView,
    },
    /// A private conversation including the recipient was opened.
    ChatStarted {
        /// The conversation.
        chat: ChatView,
    },
    /// A request from this connection failed.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerEvent {
    /// Build an `error` event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OnlineUsers(_) => "online_users",
            Self::UserOnline { .. } => "user_online",
            Self::UserOffline { .. } => "user_offline",
            Self::NewMessage { .. } => "new_message",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessagesRead { .. } => "messages_read",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStopTyping { .. } => "user_stop_typing",
            Self::MessageReaction { .. } => "message_reaction",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::GroupCreated { .. } => "group_created",
            Self::ChatStarted { .. } => "chat_started",
            Self::Error { .. } => "error",
        }
    }
}
