//! Session routes for bearer-token clients.

use super::{AppState, AuthUser};
use crate::error::ChatResult;
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use tracing::info;

/// The extractor already verified the token; echo who it belongs to.
pub(super) async fn verify(State(state): State<AppState>, user: AuthUser) -> Json<Value> {
    let mut profile = user.0.profile();
    profile.is_online = state.switchboard().presence.is_online(user.id());
    Json(json!({ "success": true, "user": profile }))
}

pub(super) async fn logout(State(state): State<AppState>, user: AuthUser) -> ChatResult<Json<Value>> {
    let closed = state.switchboard().sign_out(user.id()).await?;
    info!(user = %user.id(), closed, "User logged out");
    Ok(Json(json!({ "success": true, "message": "Logged out" })))
}
