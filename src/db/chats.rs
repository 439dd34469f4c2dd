//! Chat repository.
//!
//! Handles private and group conversations and their participant sets.

use super::{DbError, MessageRepository, UserRepository, now_millis};
use huddle_proto::{ChatSummary, ChatType, ChatView};
use sqlx::SqlitePool;
use uuid::Uuid;

/// A stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ChatRecord {
    pub id: String,
    pub chat_type: String,
    pub chat_name: Option<String>,
    pub pair_key: Option<String>,
    pub created_by: String,
    pub last_message_id: Option<String>,
    pub last_activity: i64,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChatRecord {
    pub fn kind(&self) -> Result<ChatType, DbError> {
        self.chat_type.parse().map_err(DbError::Corrupt)
    }
}

/// Key identifying the unordered pair of a private chat.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

/// Repository for chat operations.
pub struct ChatRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChatRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Return the single private chat between `a` and `b`, creating it if needed.
    ///
    /// The insert is keyed on the pair, so concurrent callers for the same
    /// pair converge on one row. A previously deactivated chat is revived.
    pub async fn find_or_create_private(&self, a: &str, b: &str) -> Result<ChatRecord, DbError> {
        let key = pair_key(a, b);
        let now = now_millis();

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO chats (id, chat_type, pair_key, created_by, last_activity, created_at, updated_at)
            VALUES (?, 'private', ?, ?, ?, ?, ?)
            ON CONFLICT(pair_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&key)
        .bind(a)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            for user_id in [a, b] {
                sqlx::query(
                    r#"
                    INSERT INTO chat_participants (chat_id, user_id, joined_at)
                    SELECT id, ?, ? FROM chats WHERE pair_key = ?
                    "#,
                )
                .bind(user_id)
                .bind(now)
                .bind(&key)
                .execute(&mut *tx)
                .await?;
            }
        } else {
            sqlx::query(
                "UPDATE chats SET is_active = 1, updated_at = ? WHERE pair_key = ? AND is_active = 0",
            )
            .bind(now)
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let chat = sqlx::query_as::<_, ChatRecord>("SELECT * FROM chats WHERE pair_key = ?")
            .bind(&key)
            .fetch_one(self.pool)
            .await?;
        Ok(chat)
    }

    /// Create a group chat. The creator is always a participant.
    pub async fn create_group(
        &self,
        name: &str,
        created_by: &str,
        participant_ids: &[String],
    ) -> Result<ChatRecord, DbError> {
        let now = now_millis();
        let id = Uuid::new_v4().to_string();

        let mut members: Vec<&str> = vec![created_by];
        for p in participant_ids {
            if !members.contains(&p.as_str()) {
                members.push(p.as_str());
            }
        }

        let mut tx = self.pool.begin().await?;
        let chat = sqlx::query_as::<_, ChatRecord>(
            r#"
            INSERT INTO chats (id, chat_type, chat_name, created_by, last_activity, created_at, updated_at)
            VALUES (?, 'group', ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(created_by)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for user_id in members {
            sqlx::query("INSERT INTO chat_participants (chat_id, user_id, joined_at) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(user_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(chat)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<ChatRecord>, DbError> {
        let chat = sqlx::query_as::<_, ChatRecord>("SELECT * FROM chats WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(chat)
    }

    pub async fn is_participant(&self, chat_id: &str, user_id: &str) -> Result<bool, DbError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM chat_participants WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(found.is_some())
    }

    pub async fn participant_ids(&self, chat_id: &str) -> Result<Vec<String>, DbError> {
        let ids = sqlx::query_scalar(
            "SELECT user_id FROM chat_participants WHERE chat_id = ? ORDER BY joined_at, user_id",
        )
        .bind(chat_id)
        .fetch_all(self.pool)
        .await?;
        Ok(ids)
    }

    /// Every chat the user belongs to, hidden ones included.
    pub async fn count_for_user(&self, user_id: &str) -> Result<i64, DbError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM chat_participants WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Ids of every active chat the user participates in.
    pub async fn active_chat_ids_for(&self, user_id: &str) -> Result<Vec<String>, DbError> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT c.id FROM chats c
            JOIN chat_participants p ON p.chat_id = c.id
            WHERE p.user_id = ? AND c.is_active = 1
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;
        Ok(ids)
    }

    /// Active chats of a user, most recent activity first.
    ///
    /// `page` is 1-based.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        kind: Option<ChatType>,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ChatRecord>, DbError> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
        let chats = sqlx::query_as::<_, ChatRecord>(
            r#"
            SELECT c.* FROM chats c
            JOIN chat_participants p ON p.chat_id = c.id
            WHERE p.user_id = ? AND c.is_active = 1 AND (? IS NULL OR c.chat_type = ?)
            ORDER BY c.last_activity DESC, c.id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(kind.map(|k| k.as_str()))
        .bind(kind.map(|k| k.as_str()))
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(self.pool)
        .await?;
        Ok(chats)
    }

    /// Point the chat at its newest message.
    pub async fn touch(&self, chat_id: &str, message_id: &str, at: i64) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE chats SET last_message_id = ?, last_activity = ?, is_active = 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(message_id)
        .bind(at)
        .bind(at)
        .bind(chat_id)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::ChatNotFound(chat_id.to_string()));
        }
        Ok(())
    }

    /// Hide a chat. Only participants may do this.
    pub async fn deactivate(&self, chat_id: &str, user_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE chats SET is_active = 0, updated_at = ?
            WHERE id = ? AND id IN (SELECT chat_id FROM chat_participants WHERE user_id = ?)
            "#,
        )
        .bind(now_millis())
        .bind(chat_id)
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn summary(&self, chat: &ChatRecord) -> Result<ChatSummary, DbError> {
        Ok(ChatSummary {
            id: chat.id.clone(),
            participants: self.participant_ids(&chat.id).await?,
            last_activity: chat.last_activity,
        })
    }

    /// Full view with participant profiles and the last message.
    pub async fn view(&self, chat: &ChatRecord) -> Result<ChatView, DbError> {
        let ids = self.participant_ids(&chat.id).await?;
        let participants = UserRepository::new(self.pool)
            .find_many(&ids)
            .await?
            .iter()
            .map(|u| u.profile())
            .collect();

        let last_message = match &chat.last_message_id {
            Some(id) => {
                let messages = MessageRepository::new(self.pool);
                match messages.find_by_id(id).await? {
                    Some(m) if !m.is_deleted => messages.hydrate(vec![m]).await?.pop(),
                    _ => None,
                }
            }
            None => None,
        };

        Ok(ChatView {
            id: chat.id.clone(),
            chat_type: chat.kind()?,
            chat_name: chat.chat_name.clone(),
            participants,
            created_by: chat.created_by.clone(),
            last_message,
            last_activity: chat.last_activity,
            is_active: chat.is_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::db::test_support::user;

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(pair_key("a", "b"), pair_key("b", "a"));
        assert_eq!(pair_key("a", "b"), "a:b");
    }

    #[tokio::test]
    async fn private_chat_is_unique_per_pair() {
        let db = crate::db::test_support::memory_db().await;
        let ada = user(&db, "ada").await;
        let bob = user(&db, "bob").await;

        let first = db.chats().find_or_create_private(&ada.id, &bob.id).await.unwrap();
        let second = db.chats().find_or_create_private(&bob.id, &ada.id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.kind().unwrap(), ChatType::Private);

        let mut participants = db.chats().participant_ids(&first.id).await.unwrap();
        participants.sort();
        let mut expected = vec![ada.id.clone(), bob.id.clone()];
        expected.sort();
        assert_eq!(participants, expected);
    }

    #[tokio::test]
    async fn concurrent_find_or_create_converges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        let ada = user(&db, "ada").await;
        let bob = user(&db, "bob").await;

        let (a, b) = tokio::join!(
            {
                let db = db.clone();
                let (x, y) = (ada.id.clone(), bob.id.clone());
                async move { db.chats().find_or_create_private(&x, &y).await }
            },
            {
                let db = db.clone();
                let (x, y) = (bob.id.clone(), ada.id.clone());
                async move { db.chats().find_or_create_private(&x, &y).await }
            }
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.id, b.id);

        let chats = db
            .chats()
            .list_for_user(&ada.id, Some(ChatType::Private), 1, 20)
            .await
            .unwrap();
        assert_eq!(chats.len(), 1);
    }

    #[tokio::test]
    async fn deactivated_private_chat_is_revived() {
        let db = crate::db::test_support::memory_db().await;
        let ada = user(&db, "ada").await;
        let bob = user(&db, "bob").await;

        let chat = db.chats().find_or_create_private(&ada.id, &bob.id).await.unwrap();
        assert!(db.chats().deactivate(&chat.id, &ada.id).await.unwrap());
        assert!(db.chats().active_chat_ids_for(&ada.id).await.unwrap().is_empty());

        let again = db.chats().find_or_create_private(&ada.id, &bob.id).await.unwrap();
        assert_eq!(again.id, chat.id);
        assert!(again.is_active);
    }

    #[tokio::test]
    async fn group_includes_creator_once() {
        let db = crate::db::test_support::memory_db().await;
        let ada = user(&db, "ada").await;
        let bob = user(&db, "bob").await;

        let chat = db
            .chats()
            .create_group("Team", &ada.id, &[bob.id.clone(), ada.id.clone()])
            .await
            .unwrap();
        assert_eq!(chat.kind().unwrap(), ChatType::Group);
        assert_eq!(db.chats().participant_ids(&chat.id).await.unwrap().len(), 2);
        assert!(db.chats().is_participant(&chat.id, &bob.id).await.unwrap());

        let view = db.chats().view(&chat).await.unwrap();
        assert_eq!(view.chat_name.as_deref(), Some("Team"));
        assert_eq!(view.participants.len(), 2);
    }

    #[tokio::test]
    async fn non_participant_cannot_deactivate() {
        let db = crate::db::test_support::memory_db().await;
        let ada = user(&db, "ada").await;
        let bob = user(&db, "bob").await;
        let eve = user(&db, "eve").await;

        let chat = db.chats().find_or_create_private(&ada.id, &bob.id).await.unwrap();
        assert!(!db.chats().deactivate(&chat.id, &eve.id).await.unwrap());
    }
}
