//! Identity verification for connections and HTTP requests.
//!
//! Credentials are HS256 JWTs whose `sub` is a stored user id. Verification
//! checks the signature, expiry and issuer, then resolves the user from
//! storage; a token for a user that no longer exists is refused.

use crate::config::SecurityConfig;
use crate::db::{Database, UserRecord};
use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    pub iss: String,
}

/// Resolves a bearer credential to a stored user.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> ChatResult<UserRecord>;
}

/// Mints tokens for provisioned users.
#[derive(Clone)]
pub struct TokenIssuer {
    key: EncodingKey,
    issuer: String,
    ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.token_issuer.clone(),
            ttl_secs: i64::try_from(config.token_ttl_secs).unwrap_or(i64::MAX / 2),
        }
    }

    pub fn issue(&self, user_id: &str) -> ChatResult<String> {
        self.issue_at(user_id, chrono::Utc::now().timestamp())
    }

    /// Mint a token as if issued at `iat`.
    pub fn issue_at(&self, user_id: &str, iat: i64) -> ChatResult<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat,
            exp: iat.saturating_add(self.ttl_secs),
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| ChatError::Internal(format!("Failed to sign token: {e}")))
    }
}

/// JWT verifier backed by the user table.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    db: Database,
}

impl JwtVerifier {
    pub fn new(config: &SecurityConfig, db: Database) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.token_issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            db,
        }
    }

    pub fn decode_claims(&self, token: &str) -> ChatResult<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Token rejected");
                ChatError::Authentication("Invalid or expired token".to_string())
            })
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> ChatResult<UserRecord> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ChatError::Authentication("Token required".to_string()));
        }
        let claims = self.decode_claims(token)?;
        self.db
            .users()
            .find_by_id(&claims.sub)
            .await?
            .ok_or_else(|| ChatError::Authentication("User not found".to_string()))
    }
}

/// Token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

/// Token from a `token=` query parameter.
pub fn query_token(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value)
        .filter(|t| !t.is_empty())
}
