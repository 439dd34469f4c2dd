//! Attachment upload and download.

use super::{AppState, AuthUser};
use crate::error::{ChatError, ChatResult};
use crate::fanout::{Command, SendMessage};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

struct FilePart {
    name: String,
    mime: String,
    data: Bytes,
}

async fn read_form(multipart: &mut Multipart) -> ChatResult<(Option<FilePart>, Option<String>)> {
    let mut file = None;
    let mut caption = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ChatError::Validation(format!("Multipart error: {e}")))?
    {
        let part = field.name().unwrap_or_default().to_string();
        match part.as_str() {
            "file" => {
                let name = field.file_name().unwrap_or_default().to_string();
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ChatError::Validation(format!("Failed to read file: {e}")))?;
                file = Some(FilePart { name, mime, data });
            }
            "caption" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ChatError::Validation(format!("Failed to read caption: {e}")))?;
                caption = Some(text);
            }
            _ => {}
        }
    }
    Ok((file, caption))
}

pub(super) async fn upload_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<String>,
    mut multipart: Multipart,
) -> ChatResult<(StatusCode, Json<Value>)> {
    let (file, caption) = read_form(&mut multipart).await?;
    let file = file
        .filter(|f| !f.name.is_empty())
        .ok_or_else(|| ChatError::Validation("No file uploaded".to_string()))?;

    let size = file.data.len() as u64;
    let message_type = state.uploads.check(&file.name, &file.mime, size)?;
    let ext = state.uploads.accepted_extension(&file.name)?;

    // Nothing touches disk for a caller outside the chat.
    let chats = state.switchboard().db.chats();
    if chats.find_by_id(&chat_id).await?.is_none() {
        return Err(ChatError::NotFound("Chat not found".to_string()));
    }
    if !chats.is_participant(&chat_id, user.id()).await? {
        return Err(ChatError::not_participant());
    }

    let stored = format!("{}.{ext}", Uuid::new_v4());
    let path = state.upload_dir.join(&stored);
    tokio::fs::create_dir_all(state.upload_dir.as_path())
        .await
        .map_err(|e| ChatError::Internal(format!("upload dir: {e}")))?;
    tokio::fs::write(&path, &file.data)
        .await
        .map_err(|e| ChatError::Internal(format!("upload write: {e}")))?;

    let content = caption
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| file.name.clone());

    let command = Command::SendMessage(SendMessage {
        chat_id: chat_id.clone(),
        content,
        message_type,
        file_url: Some(format!("/uploads/{stored}")),
        file_name: Some(file.name.clone()),
        file_size: i64::try_from(size).ok(),
        reply_to: None,
    });

    match state.engine.execute(user.origin(), command).await {
        Ok(outcome) => {
            info!(chat = %chat_id, user = %user.id(), file = %stored, size, "File uploaded");
            Ok((
                StatusCode::CREATED,
                Json(json!({ "success": true, "message": outcome.message })),
            ))
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!(file = %stored, error = %rm, "Failed to remove orphaned upload");
            }
            Err(e)
        }
    }
}

/// Only names this server generated are served.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn content_type(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

pub(super) async fn serve_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ChatResult<Response> {
    if !is_safe_name(&name) {
        return Err(ChatError::NotFound("File not found".to_string()));
    }
    let data = tokio::fs::read(state.upload_dir.join(&name))
        .await
        .map_err(|_| ChatError::NotFound("File not found".to_string()))?;
    Ok(([(header::CONTENT_TYPE, content_type(&name))], data).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_names() {
        assert!(is_safe_name("4f1c.png"));
        assert!(!is_safe_name("../secret"));
        assert!(!is_safe_name(".env"));
        assert!(!is_safe_name("a/b.png"));
        assert!(!is_safe_name(""));
    }

    #[test]
    fn guesses_content_type() {
        assert_eq!(content_type("x.PNG"), "image/png");
        assert_eq!(content_type("x.mp4"), "video/mp4");
        assert_eq!(content_type("noext"), "application/octet-stream");
    }
}
