//! User lookup, presence and private chat routes.

use super::chats::with_presence;
use super::{AppState, AuthUser, pagination};
use crate::error::{ChatError, ChatResult};
use axum::Json;
use axum::extract::{Path, Query, State};
use huddle_proto::{PublicProfile, ServerEvent};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

const MAX_STATUS: usize = 139;
const DEFAULT_SEARCH_LIMIT: i64 = 20;
const MAX_SEARCH_LIMIT: i64 = 50;

pub(super) async fn me(State(state): State<AppState>, user: AuthUser) -> Json<Value> {
    let mut profile = user.0.profile();
    profile.is_online = state.switchboard().presence.is_online(user.id());
    Json(json!({ "success": true, "user": profile }))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListQuery {
    page: Option<u32>,
    limit: Option<u32>,
    search: Option<String>,
}

/// Everyone but the caller, online users first.
pub(super) async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ChatResult<Json<Value>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = state.limits.page_size(query.limit, state.limits.chat_page_size);
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let sb = state.switchboard();
    let online = sb.presence.online_ids();
    let repo = sb.db.users();
    let offset = i64::from(page - 1) * i64::from(limit);
    let records = repo
        .list(user.id(), search, &online, i64::from(limit), offset)
        .await?;
    let total = repo.count_others(user.id(), search).await?;

    let users: Vec<PublicProfile> = records
        .iter()
        .map(|record| {
            let mut profile = record.profile();
            profile.is_online = sb.presence.is_online(&record.id);
            profile
        })
        .collect();

    let mut page_info = pagination(page, limit, users.len());
    page_info["total"] = json!(total);
    page_info["pages"] = json!((total + i64::from(limit) - 1) / i64::from(limit));
    Ok(Json(json!({ "success": true, "users": users, "pagination": page_info })))
}

pub(super) async fn get_user(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> ChatResult<Json<Value>> {
    let sb = state.switchboard();
    let record = sb
        .db
        .users()
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ChatError::NotFound("User not found".to_string()))?;
    let mut profile = record.profile();
    profile.is_online = sb.presence.is_online(&record.id);
    Ok(Json(json!({
        "success": true,
        "user": profile,
        "createdAt": record.created_at,
    })))
}

pub(super) async fn stats(State(state): State<AppState>, user: AuthUser) -> ChatResult<Json<Value>> {
    let sb = state.switchboard();
    let total_users = sb.db.users().count().await?;
    let user_chats = sb.db.chats().count_for_user(user.id()).await?;
    Ok(Json(json!({
        "success": true,
        "stats": {
            "totalUsers": total_users,
            "onlineUsers": sb.presence.len(),
            "userChats": user_chats,
            "registrationDate": user.0.created_at,
        }
    })))
}

pub(super) async fn online_users(State(state): State<AppState>, user: AuthUser) -> Json<Value> {
    let users: Vec<PublicProfile> = state
        .switchboard()
        .presence
        .snapshot()
        .into_iter()
        .filter(|p| p.id != user.id())
        .collect();
    Json(json!({ "success": true, "users": users }))
}

#[derive(Debug, Deserialize)]
pub(super) struct SearchQuery {
    q: Option<String>,
    limit: Option<i64>,
}

pub(super) async fn search_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<SearchQuery>,
) -> ChatResult<Json<Value>> {
    let term = query.q.as_deref().map(str::trim).unwrap_or_default();
    if term.is_empty() {
        return Err(ChatError::Validation("Search query is required".to_string()));
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let sb = state.switchboard();
    let users: Vec<PublicProfile> = sb
        .db
        .users()
        .search(term, user.id(), limit)
        .await?
        .iter()
        .map(|record| {
            let mut profile = record.profile();
            profile.is_online = sb.presence.is_online(&record.id);
            profile
        })
        .collect();

    Ok(Json(json!({ "success": true, "users": users })))
}

#[derive(Debug, Deserialize)]
pub(super) struct StatusBody {
    #[serde(default)]
    status: String,
}

pub(super) async fn update_status(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<StatusBody>,
) -> ChatResult<Json<Value>> {
    let status = body.status.trim();
    if status.chars().count() > MAX_STATUS {
        return Err(ChatError::Validation(format!(
            "Status must be at most {MAX_STATUS} characters"
        )));
    }
    let record = state.switchboard().db.users().update_status(user.id(), status).await?;
    debug!(user = %record.id, "Status updated");
    Ok(Json(json!({ "success": true, "user": record.profile() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StartChat {
    user_id: Option<String>,
}

pub(super) async fn start_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<StartChat>,
) -> ChatResult<Json<Value>> {
    let other = body
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ChatError::Validation("User ID is required".to_string()))?;
    if other == user.id() {
        return Err(ChatError::Validation(
            "Cannot start a chat with yourself".to_string(),
        ));
    }

    let sb = state.switchboard();
    if sb.db.users().find_by_id(&other).await?.is_none() {
        return Err(ChatError::NotFound("User not found".to_string()));
    }

    let chats = sb.db.chats();
    let chat = chats.find_or_create_private(user.id(), &other).await?;
    let view = with_presence(sb, chats.view(&chat).await?);

    for participant in [user.id(), other.as_str()] {
        sb.join_user_to_chat(participant, &chat.id);
        sb.send_to_user(participant, ServerEvent::ChatStarted { chat: view.clone() });
    }

    Ok(Json(json!({ "success": true, "chat": view })))
}
