//! Command handlers.
//!
//! Persisted commands arrive here from their chat's actor; typing and leave
//! are handled in place without storage.

use super::command::{Command, Origin, Outcome, SendMessage};
use crate::db::{MessageRecord, NewMessage, now_millis};
use crate::error::{ChatError, ChatResult};
use crate::metrics;
use crate::state::{RoomId, Switchboard};
use huddle_proto::{ChatSummary, MessageType, MessageView, ReactionAction, ServerEvent, UserRef};
use tracing::{debug, warn};

const MAX_EMOJI_CHARS: usize = 32;

pub(super) async fn apply(
    sb: &Switchboard,
    chat_id: &str,
    origin: &Origin,
    command: Command,
) -> ChatResult<Outcome> {
    match command {
        Command::JoinChat { .. } => join_chat(sb, chat_id, origin).await,
        Command::SendMessage(send) => send_message(sb, origin, send).await,
        Command::EditMessage { message_id, content } => {
            edit_message(sb, chat_id, origin, &message_id, &content).await
        }
        Command::DeleteMessage { message_id } => {
            delete_message(sb, chat_id, origin, &message_id).await
        }
        Command::AddReaction { message_id, emoji } => {
            add_reaction(sb, chat_id, origin, &message_id, &emoji).await
        }
        Command::RemoveReaction { message_id } => {
            remove_reaction(sb, chat_id, origin, &message_id).await
        }
        Command::LeaveChat { .. } => Ok(leave_chat(sb, chat_id, origin)),
        Command::TypingStart { .. } => Ok(typing(sb, chat_id, origin, true)),
        Command::TypingStop { .. } => Ok(typing(sb, chat_id, origin, false)),
    }
}

async fn require_chat(sb: &Switchboard, chat_id: &str) -> ChatResult<()> {
    match sb.db.chats().find_by_id(chat_id).await? {
        Some(_) => Ok(()),
        None => Err(ChatError::NotFound("Chat not found".to_string())),
    }
}

async fn require_participant(sb: &Switchboard, chat_id: &str, user_id: &str) -> ChatResult<()> {
    if sb.db.chats().is_participant(chat_id, user_id).await? {
        Ok(())
    } else {
        Err(ChatError::not_participant())
    }
}

/// A live (not deleted) message of this chat.
async fn require_message(sb: &Switchboard, chat_id: &str, message_id: &str) -> ChatResult<MessageRecord> {
    sb.db
        .messages()
        .find_by_id(message_id)
        .await?
        .filter(|m| !m.is_deleted && m.chat_id == chat_id)
        .ok_or_else(|| ChatError::NotFound("Message not found".to_string()))
}

fn validate_content(sb: &Switchboard, content: &str) -> ChatResult<()> {
    if content.trim().is_empty() {
        return Err(ChatError::Validation(
            "Message content is required".to_string(),
        ));
    }
    let max = sb.limits.max_message_length;
    if content.chars().count() > max {
        return Err(ChatError::Validation(format!(
            "Message too long (max {max} characters)"
        )));
    }
    Ok(())
}

async fn hydrate_one(sb: &Switchboard, record: MessageRecord) -> ChatResult<MessageView> {
    sb.db
        .messages()
        .hydrate(vec![record])
        .await?
        .pop()
        .ok_or_else(|| ChatError::Internal("Internal server error".to_string()))
}

/// The stored row as a view, without sender details, receipts or reactions.
fn bare_view(record: MessageRecord, origin: &Origin, message_type: MessageType) -> MessageView {
    MessageView {
        id: record.id,
        chat_id: record.chat_id,
        sender: UserRef {
            id: origin.user_id.clone(),
            name: origin.user_name.clone(),
            avatar: String::new(),
        },
        message_type,
        content: record.content,
        file_url: record.file_url,
        file_name: record.file_name,
        file_size: record.file_size,
        reply_to: record.reply_to,
        read_by: Vec::new(),
        reactions: Vec::new(),
        is_edited: record.is_edited,
        edited_at: record.edited_at,
        created_at: record.created_at,
    }
}

async fn join_chat(sb: &Switchboard, chat_id: &str, origin: &Origin) -> ChatResult<Outcome> {
    require_chat(sb, chat_id).await?;
    require_participant(sb, chat_id, &origin.user_id).await?;

    if let Some(conn) = origin.conn {
        sb.rooms.join_conversation_room(conn, chat_id);
    }

    let marked = sb
        .db
        .messages()
        .mark_read(chat_id, &origin.user_id, now_millis())
        .await?;
    debug!(chat = %chat_id, user = %origin.user_id, marked, "Marked chat read");

    // A reader on the HTTP path is not told about its own read either.
    let exclude = origin
        .conn
        .or_else(|| sb.presence.handle(&origin.user_id));
    let recipients = sb.broadcast_room(
        &RoomId::chat(chat_id),
        ServerEvent::MessagesRead {
            chat_id: chat_id.to_string(),
            user_id: origin.user_id.clone(),
        },
        exclude,
    );
    Ok(Outcome::delivered(recipients))
}

async fn send_message(sb: &Switchboard, origin: &Origin, send: SendMessage) -> ChatResult<Outcome> {
    validate_content(sb, &send.content)?;
    if send.message_type.is_attachment()
        && send.file_url.as_deref().is_none_or(|url| url.trim().is_empty())
    {
        return Err(ChatError::Validation(
            "File URL is required for file messages".to_string(),
        ));
    }

    let chat_id = send.chat_id.as_str();
    let message_type = send.message_type;
    require_chat(sb, chat_id).await?;
    require_participant(sb, chat_id, &origin.user_id).await?;

    if let Some(reply_to) = send.reply_to.as_deref() {
        require_message(sb, chat_id, reply_to)
            .await
            .map_err(|_| ChatError::Validation("Reply target not found".to_string()))?;
    }

    let record = sb
        .db
        .messages()
        .insert(
            &NewMessage {
                chat_id: chat_id.to_string(),
                sender_id: origin.user_id.clone(),
                message_type: send.message_type,
                content: send.content.trim().to_string(),
                file_url: send.file_url,
                file_name: send.file_name,
                file_size: send.file_size,
                reply_to: send.reply_to,
            },
            now_millis(),
        )
        .await?;
    metrics::message_sent();

    let created_at = record.created_at;
    let message_id = record.id.clone();

    // The message is durable from here on; later failures only cost delivery.
    if let Err(e) = sb.db.chats().touch(chat_id, &message_id, created_at).await {
        warn!(chat = %chat_id, message = %message_id, error = %e, "Failed to update chat activity");
    }

    let message = match hydrate_one(sb, record.clone()).await {
        Ok(message) => message,
        Err(e) => {
            warn!(chat = %chat_id, message = %message_id, error = %e, "Failed to hydrate stored message");
            bare_view(record, origin, message_type)
        }
    };
    let participants = match sb.db.chats().participant_ids(chat_id).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(chat = %chat_id, error = %e, "Failed to load participants for broadcast");
            Vec::new()
        }
    };

    let recipients = sb.broadcast_room(
        &RoomId::chat(chat_id),
        ServerEvent::NewMessage {
            message: message.clone(),
            chat: ChatSummary {
                id: chat_id.to_string(),
                participants,
                last_activity: created_at,
            },
        },
        None,
    );
    debug!(chat = %chat_id, message = %message_id, recipients, "Message delivered");

    Ok(Outcome {
        recipients,
        message: Some(message),
    })
}

async fn edit_message(
    sb: &Switchboard,
    chat_id: &str,
    origin: &Origin,
    message_id: &str,
    content: &str,
) -> ChatResult<Outcome> {
    let record = require_message(sb, chat_id, message_id).await?;
    require_participant(sb, chat_id, &origin.user_id).await?;
    if record.sender_id != origin.user_id {
        return Err(ChatError::AccessDenied(
            "You can only edit your own messages".to_string(),
        ));
    }
    validate_content(sb, content)?;

    let updated = sb
        .db
        .messages()
        .edit(message_id, content.trim(), now_millis())
        .await?;
    let message = hydrate_one(sb, updated).await?;

    let recipients = sb.broadcast_room(
        &RoomId::chat(chat_id),
        ServerEvent::MessageEdited {
            message: message.clone(),
        },
        None,
    );
    Ok(Outcome {
        recipients,
        message: Some(message),
    })
}

async fn delete_message(
    sb: &Switchboard,
    chat_id: &str,
    origin: &Origin,
    message_id: &str,
) -> ChatResult<Outcome> {
    let record = require_message(sb, chat_id, message_id).await?;
    require_participant(sb, chat_id, &origin.user_id).await?;
    if record.sender_id != origin.user_id {
        return Err(ChatError::AccessDenied(
            "You can only delete your own messages".to_string(),
        ));
    }

    if !sb.db.messages().soft_delete(message_id, now_millis()).await? {
        return Err(ChatError::NotFound("Message not found".to_string()));
    }

    let recipients = sb.broadcast_room(
        &RoomId::chat(chat_id),
        ServerEvent::MessageDeleted {
            message_id: message_id.to_string(),
            chat_id: chat_id.to_string(),
        },
        None,
    );
    Ok(Outcome::delivered(recipients))
}

async fn add_reaction(
    sb: &Switchboard,
    chat_id: &str,
    origin: &Origin,
    message_id: &str,
    emoji: &str,
) -> ChatResult<Outcome> {
    let emoji = emoji.trim();
    if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_CHARS {
        return Err(ChatError::Validation("Emoji is required".to_string()));
    }
    require_message(sb, chat_id, message_id).await?;
    require_participant(sb, chat_id, &origin.user_id).await?;

    sb.db
        .messages()
        .set_reaction(message_id, &origin.user_id, emoji, now_millis())
        .await?;

    let recipients = sb.broadcast_room(
        &RoomId::chat(chat_id),
        ServerEvent::MessageReaction {
            message_id: message_id.to_string(),
            user_id: origin.user_id.clone(),
            emoji: Some(emoji.to_string()),
            action: ReactionAction::Add,
        },
        None,
    );
    Ok(Outcome::delivered(recipients))
}

async fn remove_reaction(
    sb: &Switchboard,
    chat_id: &str,
    origin: &Origin,
    message_id: &str,
) -> ChatResult<Outcome> {
    require_message(sb, chat_id, message_id).await?;
    require_participant(sb, chat_id, &origin.user_id).await?;

    if !sb
        .db
        .messages()
        .remove_reaction(message_id, &origin.user_id)
        .await?
    {
        return Ok(Outcome::default());
    }

    let recipients = sb.broadcast_room(
        &RoomId::chat(chat_id),
        ServerEvent::MessageReaction {
            message_id: message_id.to_string(),
            user_id: origin.user_id.clone(),
            emoji: None,
            action: ReactionAction::Remove,
        },
        None,
    );
    Ok(Outcome::delivered(recipients))
}

fn leave_chat(sb: &Switchboard, chat_id: &str, origin: &Origin) -> Outcome {
    if let Some(conn) = origin.conn {
        sb.rooms.leave_conversation_room(conn, chat_id);
    }
    Outcome::default()
}

/// Typing indicators only flow from a connection joined to the room.
fn typing(sb: &Switchboard, chat_id: &str, origin: &Origin, started: bool) -> Outcome {
    let room = RoomId::chat(chat_id);
    let Some(conn) = origin.conn.filter(|conn| sb.rooms.is_member(*conn, &room)) else {
        return Outcome::default();
    };

    let event = if started {
        ServerEvent::UserTyping {
            user_id: origin.user_id.clone(),
            user_name: origin.user_name.clone(),
            chat_id: chat_id.to_string(),
        }
    } else {
        ServerEvent::UserStopTyping {
            user_id: origin.user_id.clone(),
            chat_id: chat_id.to_string(),
        }
    };
    Outcome::delivered(sb.broadcast_room(&room, event, Some(conn)))
}
