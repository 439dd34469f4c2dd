//! Message repository.
//!
//! Messages are only ever soft-deleted. Read receipts and reactions live in
//! their own tables keyed on (message, user), which makes re-marking a read a
//! no-op and keeps one reaction per user.

use super::{DbError, UserRepository, json_ids};
use huddle_proto::{MessageType, MessageView, Reaction, ReadReceipt, UserRef};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

/// A stored message row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub message_type: String,
    pub content: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub reply_to: Option<String>,
    pub is_edited: bool,
    pub edited_at: Option<i64>,
    pub is_deleted: bool,
    pub deleted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields of a message about to be stored.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub content: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub reply_to: Option<String>,
}

/// Repository for message operations.
pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, msg: &NewMessage, now: i64) -> Result<MessageRecord, DbError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages
                (id, chat_id, sender_id, message_type, content, file_url, file_name, file_size,
                 reply_to, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&msg.chat_id)
        .bind(&msg.sender_id)
        .bind(msg.message_type.as_str())
        .bind(&msg.content)
        .bind(&msg.file_url)
        .bind(&msg.file_name)
        .bind(msg.file_size)
        .bind(&msg.reply_to)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool)
        .await?;
        Ok(record)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<MessageRecord>, DbError> {
        let record = sqlx::query_as::<_, MessageRecord>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(record)
    }

    /// Conversation a message belongs to.
    pub async fn chat_id_of(&self, message_id: &str) -> Result<Option<String>, DbError> {
        let chat_id = sqlx::query_scalar("SELECT chat_id FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(chat_id)
    }

    /// One page of visible history, newest first. `page` is 1-based.
    pub async fn page(
        &self,
        chat_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, DbError> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT * FROM messages
            WHERE chat_id = ? AND is_deleted = 0
            ORDER BY created_at DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(chat_id)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    pub async fn count_for_chat(&self, chat_id: &str) -> Result<i64, DbError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Mark every visible message from other senders as read by `reader`.
    ///
    /// Returns the number of new receipts; already-read messages are skipped.
    pub async fn mark_read(&self, chat_id: &str, reader: &str, now: i64) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
            SELECT id, ?, ? FROM messages
            WHERE chat_id = ? AND sender_id != ? AND is_deleted = 0
            "#,
        )
        .bind(reader)
        .bind(now)
        .bind(chat_id)
        .bind(reader)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn edit(&self, id: &str, content: &str, now: i64) -> Result<MessageRecord, DbError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            UPDATE messages SET content = ?, is_edited = 1, edited_at = ?, updated_at = ?
            WHERE id = ? AND is_deleted = 0
            RETURNING *
            "#,
        )
        .bind(content)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        record.ok_or_else(|| DbError::Corrupt(format!("message vanished during edit: {id}")))
    }

    /// Flag a message deleted. Returns false if it already was.
    pub async fn soft_delete(&self, id: &str, now: i64) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET is_deleted = 1, deleted_at = ?, updated_at = ?
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the user's reaction, replacing any earlier one.
    pub async fn set_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        now: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(message_id, user_id) DO UPDATE SET
                emoji = excluded.emoji,
                created_at = excluded.created_at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_reaction(&self, message_id: &str, user_id: &str) -> Result<bool, DbError> {
        let result =
            sqlx::query("DELETE FROM message_reactions WHERE message_id = ? AND user_id = ?")
                .bind(message_id)
                .bind(user_id)
                .execute(self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn reactions(&self, message_id: &str) -> Result<Vec<Reaction>, DbError> {
        let mut by_message = self.reactions_for(&[message_id.to_string()]).await?;
        Ok(by_message.remove(message_id).unwrap_or_default())
    }

    async fn reactions_for(&self, ids: &[String]) -> Result<HashMap<String, Vec<Reaction>>, DbError> {
        let rows = sqlx::query_as::<_, (String, String, String, i64)>(
            r#"
            SELECT message_id, user_id, emoji, created_at FROM message_reactions
            WHERE message_id IN (SELECT value FROM json_each(?))
            ORDER BY created_at, user_id
            "#,
        )
        .bind(json_ids(ids))
        .fetch_all(self.pool)
        .await?;

        let mut map: HashMap<String, Vec<Reaction>> = HashMap::new();
        for (message_id, user_id, emoji, created_at) in rows {
            map.entry(message_id).or_default().push(Reaction {
                user_id,
                emoji,
                created_at,
            });
        }
        Ok(map)
    }

    async fn reads_for(&self, ids: &[String]) -> Result<HashMap<String, Vec<ReadReceipt>>, DbError> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            r#"
            SELECT message_id, user_id, read_at FROM message_reads
            WHERE message_id IN (SELECT value FROM json_each(?))
            ORDER BY read_at, user_id
            "#,
        )
        .bind(json_ids(ids))
        .fetch_all(self.pool)
        .await?;

        let mut map: HashMap<String, Vec<ReadReceipt>> = HashMap::new();
        for (message_id, user_id, read_at) in rows {
            map.entry(message_id)
                .or_default()
                .push(ReadReceipt { user_id, read_at });
        }
        Ok(map)
    }

    /// Attach sender, receipts and reactions. Order is preserved.
    pub async fn hydrate(&self, records: Vec<MessageRecord>) -> Result<Vec<MessageView>, DbError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let mut sender_ids: Vec<String> = records.iter().map(|r| r.sender_id.clone()).collect();
        sender_ids.sort();
        sender_ids.dedup();

        let senders: HashMap<String, UserRef> = UserRepository::new(self.pool)
            .find_many(&sender_ids)
            .await?
            .into_iter()
            .map(|u| {
                (
                    u.id.clone(),
                    UserRef {
                        id: u.id,
                        name: u.name,
                        avatar: u.avatar,
                    },
                )
            })
            .collect();
        let mut reads = self.reads_for(&ids).await?;
        let mut reactions = self.reactions_for(&ids).await?;

        records
            .into_iter()
            .map(|r| {
                let sender = senders.get(&r.sender_id).cloned().unwrap_or_else(|| UserRef {
                    id: r.sender_id.clone(),
                    name: String::new(),
                    avatar: String::new(),
                });
                let message_type = r.message_type.parse().map_err(DbError::Corrupt)?;
                Ok(MessageView {
                    read_by: reads.remove(&r.id).unwrap_or_default(),
                    reactions: reactions.remove(&r.id).unwrap_or_default(),
                    id: r.id,
                    chat_id: r.chat_id,
                    sender,
                    message_type,
                    content: r.content,
                    file_url: r.file_url,
                    file_name: r.file_name,
                    file_size: r.file_size,
                    reply_to: r.reply_to,
                    is_edited: r.is_edited,
                    edited_at: r.edited_at,
                    created_at: r.created_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::db::test_support::{memory_db, user};

    async fn seeded() -> (Database, String, String, String) {
        let db = memory_db().await;
        let ada = user(&db, "ada").await;
        let bob = user(&db, "bob").await;
        let chat = db.chats().find_or_create_private(&ada.id, &bob.id).await.unwrap();
        (db, chat.id, ada.id, bob.id)
    }

    fn text(chat_id: &str, sender: &str, content: &str) -> NewMessage {
        NewMessage {
            chat_id: chat_id.to_string(),
            sender_id: sender.to_string(),
            message_type: MessageType::Text,
            content: content.to_string(),
            file_url: None,
            file_name: None,
            file_size: None,
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_skips_own_messages() {
        let (db, chat, ada, bob) = seeded().await;
        db.messages().insert(&text(&chat, &ada, "one"), 1).await.unwrap();
        db.messages().insert(&text(&chat, &ada, "two"), 2).await.unwrap();
        db.messages().insert(&text(&chat, &bob, "mine"), 3).await.unwrap();

        assert_eq!(db.messages().mark_read(&chat, &bob, 10).await.unwrap(), 2);
        assert_eq!(db.messages().mark_read(&chat, &bob, 11).await.unwrap(), 0);

        let views = db
            .messages()
            .hydrate(db.messages().page(&chat, 1, 50).await.unwrap())
            .await
            .unwrap();
        let own = views.iter().find(|m| m.content == "mine").unwrap();
        assert!(own.read_by.is_empty());
        let first = views.iter().find(|m| m.content == "one").unwrap();
        assert_eq!(first.read_by.len(), 1);
        assert_eq!(first.read_by[0].read_at, 10);
    }

    #[tokio::test]
    async fn second_reaction_replaces_first() {
        let (db, chat, ada, bob) = seeded().await;
        let msg = db.messages().insert(&text(&chat, &ada, "hi"), 1).await.unwrap();

        db.messages().set_reaction(&msg.id, &bob, "👍", 2).await.unwrap();
        db.messages().set_reaction(&msg.id, &bob, "🎉", 3).await.unwrap();

        let reactions = db.messages().reactions(&msg.id).await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "🎉");

        assert!(db.messages().remove_reaction(&msg.id, &bob).await.unwrap());
        assert!(!db.messages().remove_reaction(&msg.id, &bob).await.unwrap());
    }

    #[tokio::test]
    async fn deleted_messages_are_hidden_but_kept() {
        let (db, chat, ada, _) = seeded().await;
        let msg = db.messages().insert(&text(&chat, &ada, "oops"), 1).await.unwrap();

        assert!(db.messages().soft_delete(&msg.id, 2).await.unwrap());
        assert!(!db.messages().soft_delete(&msg.id, 3).await.unwrap());

        assert!(db.messages().page(&chat, 1, 50).await.unwrap().is_empty());
        let row = db.messages().find_by_id(&msg.id).await.unwrap().unwrap();
        assert!(row.is_deleted);
        assert_eq!(row.deleted_at, Some(2));
        assert_eq!(db.messages().count_for_chat(&chat).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pages_run_newest_first() {
        let (db, chat, ada, _) = seeded().await;
        for i in 0..5 {
            db.messages()
                .insert(&text(&chat, &ada, &format!("m{i}")), i)
                .await
                .unwrap();
        }

        let first = db.messages().page(&chat, 1, 2).await.unwrap();
        let second = db.messages().page(&chat, 2, 2).await.unwrap();
        assert_eq!(first[0].content, "m4");
        assert_eq!(first[1].content, "m3");
        assert_eq!(second[0].content, "m2");
    }

    #[tokio::test]
    async fn edit_sets_flags() {
        let (db, chat, ada, _) = seeded().await;
        let msg = db.messages().insert(&text(&chat, &ada, "helo"), 1).await.unwrap();
        let edited = db.messages().edit(&msg.id, "hello", 5).await.unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.edited_at, Some(5));
        assert_eq!(edited.content, "hello");
    }
}
