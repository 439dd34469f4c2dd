//! User repository.
//!
//! Users are provisioned from the OAuth subject and carry the persisted
//! "last known" presence: online flag, last-seen time and the one current
//! connection handle.

use super::{DbError, json_ids};
use huddle_proto::PublicProfile;
use sqlx::SqlitePool;
use uuid::Uuid;

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRecord {
    pub id: String,
    pub google_id: String,
    pub email: String,
    pub name: String,
    pub avatar: String,
    pub status: String,
    pub is_online: bool,
    pub last_seen: i64,
    pub socket_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UserRecord {
    /// Public profile snapshot.
    pub fn profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            avatar: self.avatar.clone(),
            is_online: self.is_online,
            last_seen: self.last_seen,
            status: self.status.clone(),
        }
    }
}

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the user for an OAuth subject, or refresh its profile fields.
    pub async fn upsert_oauth(
        &self,
        google_id: &str,
        email: &str,
        name: &str,
        avatar: &str,
    ) -> Result<UserRecord, DbError> {
        let now = super::now_millis();
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, google_id, email, name, avatar, last_seen, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(google_id) DO UPDATE SET
                email = excluded.email,
                name = excluded.name,
                avatar = excluded.avatar,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(google_id)
        .bind(email)
        .bind(name)
        .bind(avatar)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, DbError> {
        let user = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(user)
    }

    /// Fetch several users at once. Unknown ids are skipped.
    pub async fn find_many(&self, ids: &[String]) -> Result<Vec<UserRecord>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let users = sqlx::query_as::<_, UserRecord>(
            "SELECT * FROM users WHERE id IN (SELECT value FROM json_each(?)) ORDER BY name",
        )
        .bind(json_ids(ids))
        .fetch_all(self.pool)
        .await?;
        Ok(users)
    }

    /// Record a new live connection. Overwrites any previous handle.
    pub async fn mark_online(&self, id: &str, socket_id: &str, now: i64) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET is_online = 1, socket_id = ?, last_seen = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(socket_id)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::UserNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Clear the online flag, but only while `socket_id` is still the
    /// recorded handle. Returns whether the row changed.
    pub async fn mark_offline(&self, id: &str, socket_id: &str, now: i64) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET is_online = 0, socket_id = '', last_seen = ?, updated_at = ?
            WHERE id = ? AND socket_id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(socket_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear the online flag of every user not in `present`. The sweep is
    /// the first to notice the loss, so `last_seen` becomes `now`.
    pub async fn clear_stale_online(&self, present: &[String], now: i64) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET is_online = 0, socket_id = '', last_seen = ?, updated_at = ?
            WHERE is_online = 1 AND id NOT IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(json_ids(present))
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Set the online flag of every user in `present` whose row says offline.
    pub async fn reassert_online(&self, present: &[String]) -> Result<u64, DbError> {
        if present.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE users SET is_online = 1
            WHERE is_online = 0 AND id IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(json_ids(present))
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Clear the online flag whatever handle is recorded. Returns whether
    /// the row was marked online.
    pub async fn clear_online(&self, id: &str, now: i64) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET is_online = 0, socket_id = '', last_seen = ?, updated_at = ?
            WHERE id = ? AND is_online = 1
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_status(&self, id: &str, status: &str) -> Result<UserRecord, DbError> {
        let user = sqlx::query_as::<_, UserRecord>(
            "UPDATE users SET status = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(status)
        .bind(super::now_millis())
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        user.ok_or_else(|| DbError::UserNotFound(id.to_string()))
    }

    /// Case-insensitive search on name and email, excluding one user.
    pub async fn search(
        &self,
        term: &str,
        exclude_id: &str,
        limit: i64,
    ) -> Result<Vec<UserRecord>, DbError> {
        let pattern = like_pattern(term);
        let users = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT * FROM users
            WHERE id != ? AND (name LIKE ? OR email LIKE ?)
            ORDER BY name
            LIMIT ?
            "#,
        )
        .bind(exclude_id)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(users)
    }

    /// One page of everyone except `exclude_id`, optionally filtered on
    /// name or email. Users in `online` sort first, then by name.
    pub async fn list(
        &self,
        exclude_id: &str,
        search: Option<&str>,
        online: &[String],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserRecord>, DbError> {
        let pattern = search.map(like_pattern);
        let users = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT * FROM users
            WHERE id != ? AND (? IS NULL OR name LIKE ? OR email LIKE ?)
            ORDER BY id IN (SELECT value FROM json_each(?)) DESC, name
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(exclude_id)
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(json_ids(online))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;
        Ok(users)
    }

    /// Size of the result set [`Self::list`] pages over.
    pub async fn count_others(&self, exclude_id: &str, search: Option<&str>) -> Result<i64, DbError> {
        let pattern = search.map(like_pattern);
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE id != ? AND (? IS NULL OR name LIKE ? OR email LIKE ?)",
        )
        .bind(exclude_id)
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    pub async fn count(&self) -> Result<i64, DbError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}

/// `LIKE` pattern for a substring match. Wildcards in the term are dropped.
fn like_pattern(term: &str) -> String {
    format!("%{}%", term.replace(['%', '_'], ""))
}
