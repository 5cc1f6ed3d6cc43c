//! In-memory chat service.
//!
//! Serves a fixed set of dialogs and messages and keeps count of every session
//! it opens and releases. Used by tests across the workspace and handy for
//! running the server without a gateway.

use crate::error::{ChatError, ChatResult};
use crate::session::{ChatSession, SessionProvider};
use crate::types::{Dialog, DialogFilter, Entity, Message, MessageQuery, PeerDialogs};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    dialogs: Vec<Dialog>,
    messages: HashMap<i64, Vec<Message>>,
    entities: HashMap<i64, Entity>,
    queries: Mutex<Vec<(i64, MessageQuery)>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    refuse_connections: bool,
    stall_messages: bool,
    failure: Option<ChatError>,
}

/// Cloneable handle; clones share state and counters.
#[derive(Clone, Default)]
pub struct MemoryChatService {
    state: Arc<State>,
}

impl MemoryChatService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_mut(&mut self) -> &mut State {
        Arc::get_mut(&mut self.state).expect("configure MemoryChatService before sharing it")
    }

    /// Add a dialog. Dialogs are listed in insertion order.
    pub fn with_dialog(mut self, dialog: Dialog) -> Self {
        self.state_mut().dialogs.push(dialog);
        self
    }

    /// Set the messages of a dialog, newest first.
    pub fn with_messages(mut self, dialog_id: i64, messages: Vec<Message>) -> Self {
        self.state_mut().messages.insert(dialog_id, messages);
        self
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.state_mut().entities.insert(entity.id, entity);
        self
    }

    /// Make every `connect` fail.
    pub fn refuse_connections(mut self) -> Self {
        self.state_mut().refuse_connections = true;
        self
    }

    /// Make message fetches wait forever.
    pub fn stall_messages(mut self) -> Self {
        self.state_mut().stall_messages = true;
        self
    }

    /// Make every remote call on a session fail with `error`.
    pub fn fail_with(mut self, error: ChatError) -> Self {
        self.state_mut().failure = Some(error);
        self
    }

    pub fn acquired(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.state.released.load(Ordering::SeqCst)
    }

    /// Message queries received so far, as (entity id, query).
    pub fn queries(&self) -> Vec<(i64, MessageQuery)> {
        self.state.queries.lock().unwrap().clone()
    }

    /// Yield until background releases have caught up with acquisitions.
    pub async fn settle(&self) {
        for _ in 0..100 {
            if self.released() >= self.acquired() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait::async_trait]
impl SessionProvider for MemoryChatService {
    async fn connect(&self) -> ChatResult<Box<dyn ChatSession>> {
        if self.state.refuse_connections {
            return Err(ChatError::Connection("connection refused".to_string()));
        }
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
        }))
    }
}

struct MemorySession {
    state: Arc<State>,
}

impl MemorySession {
    fn check(&self) -> ChatResult<()> {
        match &self.state.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ChatSession for MemorySession {
    async fn list_dialogs(&self, filter: &DialogFilter) -> ChatResult<Vec<Dialog>> {
        self.check()?;
        Ok(self
            .state
            .dialogs
            .iter()
            .filter(|d| d.archived == filter.archived)
            .filter(|d| !(filter.ignore_pinned && d.pinned))
            .cloned()
            .collect())
    }

    async fn peer_dialogs(&self, dialog_id: i64) -> ChatResult<Option<PeerDialogs>> {
        self.check()?;
        Ok(self
            .state
            .dialogs
            .iter()
            .find(|d| d.id == dialog_id)
            .map(|dialog| PeerDialogs {
                dialogs: vec![dialog.clone()],
                messages: self
                    .state
                    .messages
                    .get(&dialog_id)
                    .and_then(|m| m.first().cloned())
                    .into_iter()
                    .collect(),
            }))
    }

    async fn messages(&self, entity_id: i64, query: &MessageQuery) -> ChatResult<Vec<Message>> {
        self.check()?;
        self.state.queries.lock().unwrap().push((entity_id, *query));

        if self.state.stall_messages {
            std::future::pending::<()>().await;
        }

        let mut messages = self
            .state
            .messages
            .get(&entity_id)
            .cloned()
            .unwrap_or_default();
        if query.reverse {
            messages.reverse();
        }
        if let Some(limit) = query.limit {
            messages.truncate(limit as usize);
        }
        Ok(messages)
    }

    async fn entity(&self, entity_id: i64) -> ChatResult<Option<Entity>> {
        self.check()?;
        Ok(self.state.entities.get(&entity_id).cloned())
    }

    async fn disconnect(self: Box<Self>) -> ChatResult<()> {
        self.state.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
