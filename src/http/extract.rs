//! Request extractors.

use super::AppState;
use crate::auth;
use crate::db::UserRecord;
use crate::error::ChatError;
use crate::fanout::Origin;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

/// The verified caller of an `/api` route.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserRecord);

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn origin(&self) -> Origin {
        Origin::http(&self.0.id, &self.0.name)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());
        let token = auth::bearer_token(header)
            .ok_or_else(|| ChatError::Authentication("Access token required".to_string()))?;
        let user = state.verifier.verify(token).await?;
        Ok(Self(user))
    }
}
