//! Scoped sessions against the remote chat service.
//!
//! A [`SessionProvider`] opens one [`ChatSession`] per tool invocation. The
//! session is handed out wrapped in a [`Session`] guard that owns it
//! exclusively and releases it exactly once: through [`Session::close`] on the
//! normal path, or from `Drop` on every other path (`?` early returns, panics,
//! and aborted tasks).

use crate::error::ChatResult;
use crate::types::{Dialog, DialogFilter, Entity, Message, MessageQuery, PeerDialogs};
use std::ops::Deref;
use tracing::{debug, warn};

/// Operations available on a live connection.
#[async_trait::async_trait]
pub trait ChatSession: Send + Sync {
    /// Enumerate dialogs in the order the service returns them.
    async fn list_dialogs(&self, filter: &DialogFilter) -> ChatResult<Vec<Dialog>>;

    /// Resolve a dialog id to its metadata. `Ok(None)` when the service knows no such peer.
    async fn peer_dialogs(&self, dialog_id: i64) -> ChatResult<Option<PeerDialogs>>;

    /// Fetch messages of a dialog or entity.
    async fn messages(&self, entity_id: i64, query: &MessageQuery) -> ChatResult<Vec<Message>>;

    /// Resolve an entity by id. `Ok(None)` when it does not exist.
    async fn entity(&self, entity_id: i64) -> ChatResult<Option<Entity>>;

    /// Tear the connection down.
    async fn disconnect(self: Box<Self>) -> ChatResult<()>;
}

/// Opens sessions. Implementations must tolerate concurrent `connect` calls.
#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    /// Open a fresh connection. Fails with `ChatError::Connection`.
    async fn connect(&self) -> ChatResult<Box<dyn ChatSession>>;

    /// Open a connection wrapped in a release-on-every-path guard.
    async fn acquire(&self) -> ChatResult<Session> {
        let inner = self.connect().await?;
        debug!("session acquired");
        Ok(Session { inner: Some(inner) })
    }
}

/// Exclusively owned session. Dereferences to the underlying [`ChatSession`].
pub struct Session {
    inner: Option<Box<dyn ChatSession>>,
}

impl Session {
    /// Release the session and wait for the disconnect to finish.
    ///
    /// A failing disconnect is logged, not returned: the invocation's own
    /// result is already decided at this point.
    pub async fn close(mut self) {
        if let Some(inner) = self.inner.take() {
            if let Err(e) = inner.disconnect().await {
                warn!(error = %e, "Session disconnect failed");
            } else {
                debug!("session released");
            }
        }
    }
}

impl Deref for Session {
    type Target = dyn ChatSession;

    fn deref(&self) -> &Self::Target {
        match self.inner.as_deref() {
            Some(session) => session,
            None => unreachable!("session used after release"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("session dropped before close, releasing in background");
                handle.spawn(async move {
                    if let Err(e) = inner.disconnect().await {
                        warn!(error = %e, "Session disconnect failed");
                    }
                });
            }
            Err(_) => {
                warn!("Session dropped outside a runtime, connection left to expire");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::memory::MemoryChatService;

    #[tokio::test]
    async fn test_close_releases_once() {
        let service = MemoryChatService::new();

        let session = service.acquire().await.unwrap();
        assert_eq!(service.acquired(), 1);
        assert_eq!(service.released(), 0);

        session.close().await;
        assert_eq!(service.released(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let service = MemoryChatService::new();

        async fn failing(service: &MemoryChatService) -> ChatResult<()> {
            let session = service.acquire().await?;
            session.entity(404).await?.ok_or_else(|| ChatError::EntityNotFound("404".into()))?;
            session.close().await;
            Ok(())
        }

        assert!(failing(&service).await.is_err());
        service.settle().await;

        assert_eq!(service.acquired(), 1);
        assert_eq!(service.released(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_acquires_nothing() {
        let service = MemoryChatService::new().refuse_connections();

        let result = service.acquire().await;
        assert!(matches!(result, Err(ChatError::Connection(_))));
        assert_eq!(service.acquired(), 0);
        assert_eq!(service.released(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_distinct() {
        let service = MemoryChatService::new();

        let first = service.acquire().await.unwrap();
        let second = service.acquire().await.unwrap();
        assert_eq!(service.acquired(), 2);

        first.close().await;
        assert_eq!(service.released(), 1);
        second.close().await;
        assert_eq!(service.released(), 2);
    }
}
