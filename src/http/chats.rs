//! Chat list, history and message mutation routes.

use super::{AppState, AuthUser, PageQuery, pagination};
use crate::db::ChatRecord;
use crate::error::{ChatError, ChatResult};
use crate::fanout::{Command, SendMessage};
use crate::state::Switchboard;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use huddle_proto::{ChatView, MessageType};
use serde::Deserialize;
use serde_json::{Value, json};

/// Overlay live presence on the stored online flags.
pub(super) fn with_presence(sb: &Switchboard, mut view: ChatView) -> ChatView {
    for participant in &mut view.participants {
        participant.is_online = sb.presence.is_online(&participant.id);
    }
    view
}

pub(super) async fn views(sb: &Switchboard, records: &[ChatRecord]) -> ChatResult<Vec<ChatView>> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        out.push(with_presence(sb, sb.db.chats().view(record).await?));
    }
    Ok(out)
}

/// A chat the caller participates in; 404 otherwise.
async fn participant_chat(sb: &Switchboard, chat_id: &str, user_id: &str) -> ChatResult<ChatRecord> {
    let chats = sb.db.chats();
    match chats.find_by_id(chat_id).await? {
        Some(chat) if chats.is_participant(chat_id, user_id).await? => Ok(chat),
        _ => Err(ChatError::NotFound("Chat not found".to_string())),
    }
}

/// The path's chat must own the path's message.
async fn message_in_chat(sb: &Switchboard, chat_id: &str, message_id: &str) -> ChatResult<()> {
    match sb.db.messages().chat_id_of(message_id).await? {
        Some(owner) if owner == chat_id => Ok(()),
        _ => Err(ChatError::NotFound("Message not found".to_string())),
    }
}

pub(super) async fn list_chats(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> ChatResult<Json<Value>> {
    let (page, limit) = query.resolve(&state.limits, state.limits.chat_page_size);
    let sb = state.switchboard();
    let records = sb.db.chats().list_for_user(user.id(), None, page, limit).await?;
    let chats = views(sb, &records).await?;

    Ok(Json(json!({
        "success": true,
        "chats": chats,
        "pagination": pagination(page, limit, records.len()),
    })))
}

pub(super) async fn get_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<String>,
) -> ChatResult<Json<Value>> {
    let sb = state.switchboard();
    let chat = participant_chat(sb, &chat_id, user.id()).await?;
    let view = with_presence(sb, sb.db.chats().view(&chat).await?);
    Ok(Json(json!({ "success": true, "chat": view })))
}

pub(super) async fn delete_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<String>,
) -> ChatResult<Json<Value>> {
    if !state.switchboard().db.chats().deactivate(&chat_id, user.id()).await? {
        return Err(ChatError::NotFound("Chat not found".to_string()));
    }
    Ok(Json(json!({ "success": true, "message": "Chat deleted" })))
}

pub(super) async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ChatResult<Json<Value>> {
    let (page, limit) = query.resolve(&state.limits, state.limits.history_page_size);

    // Participant check and read receipts, same as opening the chat live.
    state
        .engine
        .execute(user.origin(), Command::JoinChat { chat_id: chat_id.clone() })
        .await?;

    let messages = state.switchboard().db.messages();
    let records = messages.page(&chat_id, page, limit).await?;
    let returned = records.len();
    let mut views = messages.hydrate(records).await?;
    views.reverse();

    Ok(Json(json!({
        "success": true,
        "messages": views,
        "pagination": pagination(page, limit, returned),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendBody {
    #[serde(default)]
    content: String,
    #[serde(default)]
    message_type: MessageType,
    file_url: Option<String>,
    file_name: Option<String>,
    file_size: Option<i64>,
    reply_to: Option<String>,
}

pub(super) async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<String>,
    Json(body): Json<SendBody>,
) -> ChatResult<(StatusCode, Json<Value>)> {
    let outcome = state
        .engine
        .execute(
            user.origin(),
            Command::SendMessage(SendMessage {
                chat_id,
                content: body.content,
                message_type: body.message_type,
                file_url: body.file_url,
                file_name: body.file_name,
                file_size: body.file_size,
                reply_to: body.reply_to,
            }),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": outcome.message })),
    ))
}

#[derive(Debug, Deserialize)]
pub(super) struct EditBody {
    #[serde(default)]
    content: String,
}

pub(super) async fn edit_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path((chat_id, message_id)): Path<(String, String)>,
    Json(body): Json<EditBody>,
) -> ChatResult<Json<Value>> {
    message_in_chat(state.switchboard(), &chat_id, &message_id).await?;
    let outcome = state
        .engine
        .execute(
            user.origin(),
            Command::EditMessage {
                message_id,
                content: body.content,
            },
        )
        .await?;
    Ok(Json(json!({ "success": true, "message": outcome.message })))
}

pub(super) async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> ChatResult<Json<Value>> {
    message_in_chat(state.switchboard(), &chat_id, &message_id).await?;
    state
        .engine
        .execute(user.origin(), Command::DeleteMessage { message_id })
        .await?;
    Ok(Json(json!({ "success": true, "message": "Message deleted" })))
}

#[derive(Debug, Deserialize)]
pub(super) struct ReactBody {
    #[serde(default)]
    emoji: String,
}

pub(super) async fn add_reaction(
    State(state): State<AppState>,
    user: AuthUser,
    Path((chat_id, message_id)): Path<(String, String)>,
    Json(body): Json<ReactBody>,
) -> ChatResult<Json<Value>> {
    message_in_chat(state.switchboard(), &chat_id, &message_id).await?;
    state
        .engine
        .execute(
            user.origin(),
            Command::AddReaction {
                message_id: message_id.clone(),
                emoji: body.emoji,
            },
        )
        .await?;
    let reactions = state.switchboard().db.messages().reactions(&message_id).await?;
    Ok(Json(json!({ "success": true, "reactions": reactions })))
}

pub(super) async fn remove_reaction(
    State(state): State<AppState>,
    user: AuthUser,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> ChatResult<Json<Value>> {
    message_in_chat(state.switchboard(), &chat_id, &message_id).await?;
    state
        .engine
        .execute(
            user.origin(),
            Command::RemoveReaction {
                message_id: message_id.clone(),
            },
        )
        .await?;
    let reactions = state.switchboard().db.messages().reactions(&message_id).await?;
    Ok(Json(json!({ "success": true, "reactions": reactions })))
}
