//! Group conversations.

use super::chats::{views, with_presence};
use super::{AppState, AuthUser, PageQuery, pagination};
use crate::error::{ChatError, ChatResult};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use huddle_proto::{ChatType, ServerEvent};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::info;

const MAX_ROOM_NAME: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateRoom {
    #[serde(default)]
    chat_name: String,
    #[serde(default)]
    participant_ids: Vec<String>,
}

pub(super) async fn list_rooms(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> ChatResult<Json<Value>> {
    let (page, limit) = query.resolve(&state.limits, state.limits.chat_page_size);
    let sb = state.switchboard();
    let records = sb
        .db
        .chats()
        .list_for_user(user.id(), Some(ChatType::Group), page, limit)
        .await?;
    let rooms = views(sb, &records).await?;

    Ok(Json(json!({
        "success": true,
        "rooms": rooms,
        "pagination": pagination(page, limit, records.len()),
    })))
}

pub(super) async fn create_room(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateRoom>,
) -> ChatResult<(StatusCode, Json<Value>)> {
    let name = body.chat_name.trim();
    if name.is_empty() {
        return Err(ChatError::Validation("Room name is required".to_string()));
    }
    if name.chars().count() > MAX_ROOM_NAME {
        return Err(ChatError::Validation(format!(
            "Room name must be at most {MAX_ROOM_NAME} characters"
        )));
    }

    let mut seen = HashSet::new();
    let invited: Vec<String> = body
        .participant_ids
        .into_iter()
        .filter(|id| id != user.id() && seen.insert(id.clone()))
        .collect();
    if invited.is_empty() {
        return Err(ChatError::Validation(
            "At least one other participant is required".to_string(),
        ));
    }

    let sb = state.switchboard();
    let found = sb.db.users().find_many(&invited).await?;
    if found.len() != invited.len() {
        return Err(ChatError::NotFound("User not found".to_string()));
    }

    let chats = sb.db.chats();
    let chat = chats.create_group(name, user.id(), &invited).await?;
    let view = with_presence(sb, chats.view(&chat).await?);

    for participant in &view.participants {
        sb.join_user_to_chat(&participant.id, &chat.id);
        sb.send_to_user(&participant.id, ServerEvent::GroupCreated { chat: view.clone() });
    }
    info!(chat = %chat.id, user = %user.id(), members = view.participants.len(), "Group created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "chat": view })),
    ))
}
