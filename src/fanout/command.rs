//! Commands accepted by the fan-out engine.

use crate::state::ConnId;
use huddle_proto::{ClientEvent, MessageType, MessageView};

/// Who issued a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub user_id: String,
    pub user_name: String,
    /// Issuing connection; `None` for the HTTP API.
    pub conn: Option<ConnId>,
}

impl Origin {
    pub fn connection(user_id: impl Into<String>, user_name: impl Into<String>, conn: ConnId) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            conn: Some(conn),
        }
    }

    pub fn http(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            conn: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessage {
    pub chat_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub reply_to: Option<String>,
}

impl SendMessage {
    pub fn text(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            content: content.into(),
            message_type: MessageType::Text,
            file_url: None,
            file_name: None,
            file_size: None,
            reply_to: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    JoinChat { chat_id: String },
    LeaveChat { chat_id: String },
    SendMessage(SendMessage),
    EditMessage { message_id: String, content: String },
    DeleteMessage { message_id: String },
    AddReaction { message_id: String, emoji: String },
    RemoveReaction { message_id: String },
    TypingStart { chat_id: String },
    TypingStop { chat_id: String },
}

impl Command {
    /// Metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinChat { .. } => "join_chat",
            Self::LeaveChat { .. } => "leave_chat",
            Self::SendMessage(_) => "send_message",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::AddReaction { .. } => "add_reaction",
            Self::RemoveReaction { .. } => "remove_reaction",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
        }
    }

    /// Chat named directly by the command.
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            Self::JoinChat { chat_id }
            | Self::LeaveChat { chat_id }
            | Self::TypingStart { chat_id }
            | Self::TypingStop { chat_id } => Some(chat_id),
            Self::SendMessage(send) => Some(&send.chat_id),
            _ => None,
        }
    }

    /// Message the command targets.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::EditMessage { message_id, .. }
            | Self::DeleteMessage { message_id }
            | Self::AddReaction { message_id, .. }
            | Self::RemoveReaction { message_id } => Some(message_id),
            _ => None,
        }
    }

    /// Whether the command needs storage and so runs inside a conversation
    /// actor.
    pub fn is_persisted(&self) -> bool {
        !matches!(
            self,
            Self::LeaveChat { .. } | Self::TypingStart { .. } | Self::TypingStop { .. }
        )
    }
}

impl From<ClientEvent> for Command {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::JoinChat { chat_id } => Self::JoinChat { chat_id },
            ClientEvent::LeaveChat { chat_id } => Self::LeaveChat { chat_id },
            ClientEvent::SendMessage {
                chat_id,
                content,
                message_type,
                file_url,
                file_name,
                file_size,
                reply_to,
            } => Self::SendMessage(SendMessage {
                chat_id,
                content,
                message_type,
                file_url,
                file_name,
                file_size,
                reply_to,
            }),
            ClientEvent::EditMessage { message_id, content } => Self::EditMessage { message_id, content },
            ClientEvent::TypingStart { chat_id } => Self::TypingStart { chat_id },
            ClientEvent::TypingStop { chat_id } => Self::TypingStop { chat_id },
            ClientEvent::AddReaction { message_id, emoji } => Self::AddReaction { message_id, emoji },
            ClientEvent::RemoveReaction { message_id } => Self::RemoveReaction { message_id },
            ClientEvent::DeleteMessage { message_id } => Self::DeleteMessage { message_id },
        }
    }
}

/// Result of a successful command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Connections the resulting event was queued for.
    pub recipients: usize,
    /// Message created or changed by the command.
    pub message: Option<MessageView>,
}

impl Outcome {
    pub fn delivered(recipients: usize) -> Self {
        Self {
            recipients,
            message: None,
        }
    }
}
