//! Per-conversation actors.
//!
//! Every storage-touching command for one chat runs inside that chat's
//! `ConversationActor`, one at a time, so the broadcasts of a chat leave in
//! the order their writes completed.
//!
//! # Lifecycle
//!
//! Actors are spawned on first use and retire after an idle period. A
//! retiring actor unregisters itself, closes its mailbox and drains what was
//! already queued. A send that loses the race against retirement sees a
//! closed mailbox and is retried once on a fresh actor.

use super::command::{Command, Origin, Outcome};
use super::handlers;
use crate::error::{ChatError, ChatResult};
use crate::metrics;
use crate::state::Switchboard;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

pub enum ConversationEvent {
    Execute {
        origin: Origin,
        command: Command,
        reply_tx: oneshot::Sender<ChatResult<Outcome>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActorState {
    Active,
    Draining,
}

struct ConversationHandle {
    generation: u64,
    tx: mpsc::Sender<ConversationEvent>,
}

pub struct ConversationActor {
    chat_id: String,
    generation: u64,
    switchboard: Weak<Switchboard>,
    idle: Duration,
    state: ActorState,
}

impl ConversationActor {
    fn spawn(
        chat_id: String,
        generation: u64,
        switchboard: Weak<Switchboard>,
        mailbox: usize,
        idle: Duration,
    ) -> mpsc::Sender<ConversationEvent> {
        let (tx, rx) = mpsc::channel(mailbox);
        let actor = Self {
            chat_id,
            generation,
            switchboard,
            idle,
            state: ActorState::Active,
        };
        metrics::conversation_started();
        tokio::spawn(async move {
            actor.run(rx).await;
        });
        tx
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ConversationEvent>) {
        while self.state == ActorState::Active {
            match tokio::time::timeout(self.idle, rx.recv()).await {
                Ok(Some(event)) => self.handle_event(event).await,
                Ok(None) => break,
                Err(_) => self.state = ActorState::Draining,
            }
        }

        if let Some(switchboard) = self.switchboard.upgrade() {
            switchboard.conversations.forget(&self.chat_id, self.generation);
        }
        rx.close();
        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }

        metrics::conversation_retired();
        debug!(chat = %self.chat_id, "Conversation actor retired");
    }

    async fn handle_event(&mut self, event: ConversationEvent) {
        match event {
            ConversationEvent::Execute {
                origin,
                command,
                reply_tx,
            } => {
                let result = match self.switchboard.upgrade() {
                    Some(switchboard) => {
                        handlers::apply(&switchboard, &self.chat_id, &origin, command).await
                    }
                    None => Err(ChatError::Internal("Server is shutting down".to_string())),
                };
                // The requester may have gone away; the work is done either way.
                let _ = reply_tx.send(result);
            }
        }
    }
}

/// Registry of running conversation actors, keyed by chat id.
pub struct ConversationManager {
    actors: DashMap<String, ConversationHandle>,
    generations: AtomicU64,
    mailbox: usize,
    idle: Duration,
}

impl ConversationManager {
    pub fn new(mailbox: usize, idle: Duration) -> Self {
        Self {
            actors: DashMap::new(),
            generations: AtomicU64::new(1),
            mailbox,
            idle,
        }
    }

    /// Run `command` inside the actor for `chat_id`.
    pub async fn dispatch(
        &self,
        switchboard: &Arc<Switchboard>,
        chat_id: &str,
        origin: Origin,
        command: Command,
    ) -> ChatResult<Outcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut event = ConversationEvent::Execute {
            origin,
            command,
            reply_tx,
        };

        for _ in 0..2 {
            let (generation, tx) = self.sender_for(switchboard, chat_id);
            match tx.send(event).await {
                Ok(()) => {
                    return reply_rx.await.map_err(|_| {
                        ChatError::Internal("Conversation actor dropped the request".to_string())
                    })?;
                }
                Err(mpsc::error::SendError(returned)) => {
                    debug!(chat = %chat_id, "Conversation actor retired mid-send, respawning");
                    self.forget(chat_id, generation);
                    event = returned;
                }
            }
        }

        Err(ChatError::Internal(
            "Conversation actor unavailable".to_string(),
        ))
    }

    fn sender_for(&self, switchboard: &Arc<Switchboard>, chat_id: &str) -> (u64, mpsc::Sender<ConversationEvent>) {
        if let Some(handle) = self.actors.get(chat_id) {
            return (handle.generation, handle.tx.clone());
        }
        let handle = self.actors.entry(chat_id.to_string()).or_insert_with(|| {
            let generation = self.generations.fetch_add(1, Ordering::Relaxed);
            let tx = ConversationActor::spawn(
                chat_id.to_string(),
                generation,
                Arc::downgrade(switchboard),
                self.mailbox,
                self.idle,
            );
            ConversationHandle { generation, tx }
        });
        (handle.generation, handle.tx.clone())
    }

    /// Unregister an actor, unless a newer one already took its place.
    pub(crate) fn forget(&self, chat_id: &str, generation: u64) {
        self.actors
            .remove_if(chat_id, |_, handle| handle.generation == generation);
    }

    pub fn active(&self) -> usize {
        self.actors.len()
    }
}
