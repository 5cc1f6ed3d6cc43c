// ListMessages tool

use crate::error::ToolError;
use crate::protocol::ContentItem;
use crate::tools::{ToolArgs, ToolHandler};
use chatgate_core::{ChatError, ChatSession, MessageQuery, SessionProvider};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// List messages in a given dialog, chat or channel. The messages are listed in order from newest to oldest.
///
/// If `unread` is set to `true`, only unread messages will be listed. Once a message is read, it will not be
/// listed again.
///
/// If `limit` is set, only the last `limit` messages will be listed. If `unread` is set, the limit will be
/// the minimum between the unread messages and the limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ListMessages {
    pub dialog_id: i64,
    #[serde(default)]
    pub unread: bool,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

impl ToolArgs for ListMessages {}

impl ListMessages {
    /// How many messages to request given the dialog's unread count.
    pub fn effective_limit(&self, unread_count: u32) -> u32 {
        if self.unread {
            unread_count.min(self.limit)
        } else {
            self.limit
        }
    }
}

pub struct ListMessagesTool {
    sessions: Arc<dyn SessionProvider>,
}

impl ListMessagesTool {
    pub fn new(sessions: Arc<dyn SessionProvider>) -> Self {
        Self { sessions }
    }
}

#[async_trait::async_trait]
impl ToolHandler for ListMessagesTool {
    type Args = ListMessages;

    async fn call(&self, args: ListMessages) -> Result<Vec<ContentItem>, ToolError> {
        let session = self.sessions.acquire().await?;

        let peer = session.peer_dialogs(args.dialog_id).await?.ok_or_else(|| {
            ChatError::EntityNotFound(format!("Dialog not found: {}", args.dialog_id))
        })?;
        let dialog = peer
            .dialogs
            .iter()
            .find(|d| d.id == args.dialog_id)
            .ok_or_else(|| {
                ChatError::UnexpectedResultShape(format!(
                    "lookup of dialog {} returned {} other dialog(s)",
                    args.dialog_id,
                    peer.dialogs.len()
                ))
            })?;
        debug!(dialog = ?dialog, "resolved dialog");

        let query = MessageQuery::newest_first(Some(args.effective_limit(dialog.unread_count)));
        debug!(query = ?query, "fetching messages");
        let messages = session.messages(args.dialog_id, &query).await?;

        let content = messages
            .iter()
            .filter_map(|message| message.body())
            .map(ContentItem::text)
            .collect();

        session.close().await;
        Ok(content)
    }
}
