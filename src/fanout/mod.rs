//! Message fan-out engine.
//!
//! One entry point, [`FanoutEngine::execute`], for both the realtime and the
//! HTTP path. Commands that touch storage are serialized per chat through
//! [`ConversationManager`]; typing indicators and room leaves never wait on
//! storage.

mod actor;
mod command;
mod handlers;

pub use actor::{ConversationActor, ConversationEvent, ConversationManager};
pub use command::{Command, Origin, Outcome, SendMessage};

use crate::error::{ChatError, ChatResult};
use crate::metrics;
use crate::state::Switchboard;
use crate::telemetry::{EventTimer, spans};
use std::sync::Arc;
use tracing::{Instrument, debug};

#[derive(Clone)]
pub struct FanoutEngine {
    switchboard: Arc<Switchboard>,
}

impl FanoutEngine {
    pub fn new(switchboard: Arc<Switchboard>) -> Self {
        Self { switchboard }
    }

    pub fn switchboard(&self) -> &Arc<Switchboard> {
        &self.switchboard
    }

    /// Validate, persist and broadcast one command.
    pub async fn execute(&self, origin: Origin, command: Command) -> ChatResult<Outcome> {
        let name = command.name();
        let _timer = EventTimer::new(name);
        let span = spans::command(name, &origin.user_id, command.chat_id());

        let result = self.route(origin, command).instrument(span).await;
        if let Err(e) = &result {
            metrics::record_event_error(name, e.error_code());
            debug!(command = name, error = %e, "Command failed");
        }
        result
    }

    async fn route(&self, origin: Origin, command: Command) -> ChatResult<Outcome> {
        let sb = &self.switchboard;
        if !command.is_persisted() {
            let chat_id = command.chat_id().unwrap_or_default().to_string();
            return handlers::apply(sb, &chat_id, &origin, command).await;
        }

        let chat_id = match (command.chat_id(), command.message_id()) {
            (Some(chat_id), _) => chat_id.to_string(),
            (None, Some(message_id)) => sb
                .db
                .messages()
                .chat_id_of(message_id)
                .await?
                .ok_or_else(|| ChatError::NotFound("Message not found".to_string()))?,
            (None, None) => {
                return Err(ChatError::Validation("Missing chat id".to_string()));
            }
        };

        sb.conversations.dispatch(sb, &chat_id, origin, command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::UserRecord;
    use crate::db::test_support::{memory_db, user};
    use crate::state::{ConnectionHandle, Outbound};
    use huddle_proto::{MessageType, ReactionAction, ServerEvent};
    use tokio::sync::{mpsc, oneshot};

    struct Conn {
        origin: Origin,
        rx: mpsc::Receiver<Outbound>,
        _close_rx: oneshot::Receiver<String>,
    }

    impl Conn {
        fn events(&mut self) -> Vec<Outbound> {
            let mut out = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                out.push(event);
            }
            out
        }

        fn names(&mut self) -> Vec<&'static str> {
            self.events().iter().map(|e| e.name()).collect()
        }
    }

    async fn engine() -> FanoutEngine {
        let config = Config::parse(
            r#"
            [server]
            name = "test"
            [listen]
            address = "127.0.0.1:0"
            [limits]
            max_message_length = 50
            "#,
        )
        .unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let sb = Switchboard::new(&config, memory_db().await, tx);
        FanoutEngine::new(Arc::new(sb))
    }

    async fn connect(engine: &FanoutEngine, user: &UserRecord) -> Conn {
        let sb = engine.switchboard();
        let (tx, rx) = mpsc::channel(64);
        let (close_tx, close_rx) = oneshot::channel();
        let conn = sb.conn_ids.next();
        let handle = Arc::new(ConnectionHandle::new(conn, &user.id, &user.name, tx, close_tx));
        sb.activate(handle, user).await.unwrap();
        let mut c = Conn {
            origin: Origin::connection(&user.id, &user.name, conn),
            rx,
            _close_rx: close_rx,
        };
        c.events();
        c
    }

    async fn private_chat(engine: &FanoutEngine, a: &UserRecord, b: &UserRecord) -> String {
        engine
            .switchboard()
            .db
            .chats()
            .find_or_create_private(&a.id, &b.id)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn send_reaches_both_members_and_updates_activity() {
        let engine = engine().await;
        let alice = user(&engine.switchboard().db, "alice").await;
        let bob = user(&engine.switchboard().db, "bob").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;

        let mut a = connect(&engine, &alice).await;
        let mut b = connect(&engine, &bob).await;
        a.events();
        for c in [&a, &b] {
            engine
                .execute(c.origin.clone(), Command::JoinChat { chat_id: chat_id.clone() })
                .await
                .unwrap();
        }
        a.events();
        b.events();

        let outcome = engine
            .execute(a.origin.clone(), Command::SendMessage(SendMessage::text(&chat_id, "hi")))
            .await
            .unwrap();
        assert_eq!(outcome.recipients, 2);
        let message = outcome.message.unwrap();

        for c in [&mut a, &mut b] {
            let events = c.events();
            assert_eq!(events.len(), 1);
            match events[0].as_ref() {
                ServerEvent::NewMessage { message: m, chat } => {
                    assert_eq!(m.content, "hi");
                    assert_eq!(chat.id, chat_id);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        let chat = engine
            .switchboard()
            .db
            .chats()
            .find_by_id(&chat_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chat.last_activity, message.created_at);
        assert_eq!(chat.last_message_id.as_deref(), Some(message.id.as_str()));
    }

    #[tokio::test]
    async fn non_participant_send_is_denied_without_side_effects() {
        let engine = engine().await;
        let db = &engine.switchboard().db;
        let alice = user(db, "alice").await;
        let bob = user(db, "bob").await;
        let eve = user(db, "eve").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;

        let mut a = connect(&engine, &alice).await;
        let mut e = connect(&engine, &eve).await;
        a.events();

        let err = engine
            .execute(e.origin.clone(), Command::SendMessage(SendMessage::text(&chat_id, "spam")))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AccessDenied(_)));
        assert!(a.names().is_empty());
        assert!(e.names().is_empty());
        assert_eq!(db.messages().count_for_chat(&chat_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn validation_rejects_bad_messages() {
        let engine = engine().await;
        let db = &engine.switchboard().db;
        let alice = user(db, "alice").await;
        let bob = user(db, "bob").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;
        let origin = Origin::http(&alice.id, &alice.name);

        for send in [
            SendMessage::text(&chat_id, "   "),
            SendMessage::text(&chat_id, "x".repeat(51)),
            SendMessage {
                message_type: MessageType::Image,
                ..SendMessage::text(&chat_id, "pic")
            },
        ] {
            let err = engine
                .execute(origin.clone(), Command::SendMessage(send))
                .await
                .unwrap_err();
            assert!(matches!(err, ChatError::Validation(_)), "{err:?}");
        }

        let err = engine
            .execute(origin, Command::SendMessage(SendMessage::text("missing", "hi")))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn typing_skips_sender_and_requires_membership() {
        let engine = engine().await;
        let db = &engine.switchboard().db;
        let alice = user(db, "alice").await;
        let bob = user(db, "bob").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;

        let mut a = connect(&engine, &alice).await;
        let mut b = connect(&engine, &bob).await;
        a.events();

        let outcome = engine
            .execute(a.origin.clone(), Command::TypingStart { chat_id: chat_id.clone() })
            .await
            .unwrap();
        assert_eq!(outcome.recipients, 1);
        assert!(a.names().is_empty());
        assert_eq!(b.names(), vec!["user_typing"]);

        engine
            .execute(a.origin.clone(), Command::LeaveChat { chat_id: chat_id.clone() })
            .await
            .unwrap();
        let outcome = engine
            .execute(a.origin.clone(), Command::TypingStop { chat_id: chat_id.clone() })
            .await
            .unwrap();
        assert_eq!(outcome.recipients, 0);
        assert!(b.names().is_empty());
    }

    #[tokio::test]
    async fn reactions_are_last_write_wins() {
        let engine = engine().await;
        let db = &engine.switchboard().db;
        let alice = user(db, "alice").await;
        let bob = user(db, "bob").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;
        let a = Origin::http(&alice.id, &alice.name);
        let b = Origin::http(&bob.id, &bob.name);

        let message = engine
            .execute(a, Command::SendMessage(SendMessage::text(&chat_id, "hi")))
            .await
            .unwrap()
            .message
            .unwrap();

        for emoji in ["👍", "🎉"] {
            engine
                .execute(
                    b.clone(),
                    Command::AddReaction {
                        message_id: message.id.clone(),
                        emoji: emoji.to_string(),
                    },
                )
                .await
                .unwrap();
        }

        let reactions = db.messages().reactions(&message.id).await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].user_id, bob.id);
        assert_eq!(reactions[0].emoji, "🎉");
    }

    #[tokio::test]
    async fn only_sender_may_edit_or_delete() {
        let engine = engine().await;
        let db = &engine.switchboard().db;
        let alice = user(db, "alice").await;
        let bob = user(db, "bob").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;
        let a = Origin::http(&alice.id, &alice.name);
        let b = Origin::http(&bob.id, &bob.name);

        let message = engine
            .execute(a.clone(), Command::SendMessage(SendMessage::text(&chat_id, "hi")))
            .await
            .unwrap()
            .message
            .unwrap();

        let err = engine
            .execute(b, Command::DeleteMessage { message_id: message.id.clone() })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AccessDenied(_)));

        let edited = engine
            .execute(
                a.clone(),
                Command::EditMessage {
                    message_id: message.id.clone(),
                    content: "hello".into(),
                },
            )
            .await
            .unwrap()
            .message
            .unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.content, "hello");

        engine
            .execute(a.clone(), Command::DeleteMessage { message_id: message.id.clone() })
            .await
            .unwrap();
        let err = engine
            .execute(a, Command::EditMessage { message_id: message.id, content: "again".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn join_marks_read_and_notifies_others() {
        let engine = engine().await;
        let db = &engine.switchboard().db;
        let alice = user(db, "alice").await;
        let bob = user(db, "bob").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;

        let mut a = connect(&engine, &alice).await;
        let mut b = connect(&engine, &bob).await;
        a.events();

        engine
            .execute(a.origin.clone(), Command::SendMessage(SendMessage::text(&chat_id, "hi")))
            .await
            .unwrap();
        a.events();
        b.events();

        engine
            .execute(b.origin.clone(), Command::JoinChat { chat_id: chat_id.clone() })
            .await
            .unwrap();
        assert_eq!(a.names(), vec!["messages_read"]);
        assert!(b.names().is_empty());

        let page = db.messages().page(&chat_id, 1, 10).await.unwrap();
        let views = db.messages().hydrate(page).await.unwrap();
        assert_eq!(views[0].read_by.len(), 1);
        assert_eq!(views[0].read_by[0].user_id, bob.id);
    }

    #[tokio::test]
    async fn sends_after_actor_retirement_still_land() {
        let config = Config::parse(
            r#"
            [server]
            name = "test"
            [listen]
            address = "127.0.0.1:0"
            [limits]
            actor_idle_secs = 1
            "#,
        )
        .unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let engine = FanoutEngine::new(Arc::new(Switchboard::new(&config, memory_db().await, tx)));
        let db = &engine.switchboard().db;
        let alice = user(db, "alice").await;
        let bob = user(db, "bob").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;
        let a = Origin::http(&alice.id, &alice.name);

        engine
            .execute(a.clone(), Command::SendMessage(SendMessage::text(&chat_id, "one")))
            .await
            .unwrap();
        assert_eq!(engine.switchboard().conversations.active(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
        assert_eq!(engine.switchboard().conversations.active(), 0);

        engine
            .execute(a, Command::SendMessage(SendMessage::text(&chat_id, "two")))
            .await
            .unwrap();
        assert_eq!(db.messages().count_for_chat(&chat_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reaction_removal_broadcasts_once_and_outsiders_are_denied() {
        let engine = engine().await;
        let db = &engine.switchboard().db;
        let alice = user(db, "alice").await;
        let bob = user(db, "bob").await;
        let eve = user(db, "eve").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;

        let mut a = connect(&engine, &alice).await;
        let mut b = connect(&engine, &bob).await;
        let mut e = connect(&engine, &eve).await;

        let message = engine
            .execute(a.origin.clone(), Command::SendMessage(SendMessage::text(&chat_id, "hi")))
            .await
            .unwrap()
            .message
            .unwrap();
        engine
            .execute(
                b.origin.clone(),
                Command::AddReaction {
                    message_id: message.id.clone(),
                    emoji: "👍".into(),
                },
            )
            .await
            .unwrap();
        a.events();
        b.events();
        e.events();

        let err = engine
            .execute(
                e.origin.clone(),
                Command::AddReaction {
                    message_id: message.id.clone(),
                    emoji: "😈".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AccessDenied(_)), "{err:?}");
        assert!(a.names().is_empty());
        assert!(e.names().is_empty());
        assert_eq!(db.messages().reactions(&message.id).await.unwrap().len(), 1);

        let outcome = engine
            .execute(b.origin.clone(), Command::RemoveReaction { message_id: message.id.clone() })
            .await
            .unwrap();
        assert_eq!(outcome.recipients, 2);
        let events = a.events();
        assert_eq!(events.len(), 1);
        match events[0].as_ref() {
            ServerEvent::MessageReaction {
                message_id,
                user_id,
                emoji,
                action,
            } => {
                assert_eq!(message_id, &message.id);
                assert_eq!(user_id, &bob.id);
                assert!(emoji.is_none());
                assert!(matches!(action, ReactionAction::Remove));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(b.names(), vec!["message_reaction"]);
        assert!(db.messages().reactions(&message.id).await.unwrap().is_empty());

        // Nothing left to remove.
        let outcome = engine
            .execute(b.origin.clone(), Command::RemoveReaction { message_id: message.id })
            .await
            .unwrap();
        assert_eq!(outcome.recipients, 0);
        assert!(a.names().is_empty());
        assert!(b.names().is_empty());
    }

    #[tokio::test]
    async fn stored_message_is_returned_when_hydration_fails() {
        let engine = engine().await;
        let db = &engine.switchboard().db;
        let alice = user(db, "alice").await;
        let bob = user(db, "bob").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;

        let a = connect(&engine, &alice).await;
        let mut b = connect(&engine, &bob).await;

        sqlx::query("DROP TABLE message_reactions")
            .execute(db.pool())
            .await
            .unwrap();

        let outcome = engine
            .execute(a.origin.clone(), Command::SendMessage(SendMessage::text(&chat_id, "hi")))
            .await
            .unwrap();
        let message = outcome.message.unwrap();
        assert_eq!(message.content, "hi");
        assert_eq!(message.sender.id, alice.id);
        assert_eq!(message.sender.name, "alice");
        assert!(message.reactions.is_empty());
        assert_eq!(outcome.recipients, 2);
        assert_eq!(b.names(), vec!["new_message"]);
        assert_eq!(db.messages().count_for_chat(&chat_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn http_reader_is_not_told_about_its_own_read() {
        let engine = engine().await;
        let db = &engine.switchboard().db;
        let alice = user(db, "alice").await;
        let bob = user(db, "bob").await;
        let chat_id = private_chat(&engine, &alice, &bob).await;

        let mut a = connect(&engine, &alice).await;
        let mut b = connect(&engine, &bob).await;
        engine
            .execute(a.origin.clone(), Command::SendMessage(SendMessage::text(&chat_id, "hi")))
            .await
            .unwrap();
        a.events();
        b.events();

        let outcome = engine
            .execute(Origin::http(&bob.id, &bob.name), Command::JoinChat { chat_id })
            .await
            .unwrap();
        assert_eq!(outcome.recipients, 1);
        assert_eq!(a.names(), vec!["messages_read"]);
        assert!(b.names().is_empty());
    }
}
