// ListDialogs tool

use crate::error::ToolError;
use crate::protocol::ContentItem;
use crate::tools::{ToolArgs, ToolHandler};
use chatgate_core::{ChatSession, DialogFilter, SessionProvider};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// List available dialogs, chats and channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ListDialogs {
    /// Only list dialogs with unread messages
    #[serde(default)]
    pub unread: bool,
    /// List archived dialogs instead of the main folder
    #[serde(default)]
    pub archived: bool,
    /// Leave out pinned dialogs
    #[serde(default)]
    pub ignore_pinned: bool,
}

impl ToolArgs for ListDialogs {}

pub struct ListDialogsTool {
    sessions: Arc<dyn SessionProvider>,
}

impl ListDialogsTool {
    pub fn new(sessions: Arc<dyn SessionProvider>) -> Self {
        Self { sessions }
    }
}

#[async_trait::async_trait]
impl ToolHandler for ListDialogsTool {
    type Args = ListDialogs;

    async fn call(&self, args: ListDialogs) -> Result<Vec<ContentItem>, ToolError> {
        let session = self.sessions.acquire().await?;

        let filter = DialogFilter {
            archived: args.archived,
            ignore_pinned: args.ignore_pinned,
        };
        let dialogs = session.list_dialogs(&filter).await?;

        let content = dialogs
            .iter()
            .filter(|dialog| !(args.unread && dialog.unread_count == 0))
            .map(|dialog| {
                ContentItem::text(format!(
                    "name='{}' id={} unread={} mentions={}",
                    dialog.name, dialog.id, dialog.unread_count, dialog.unread_mentions_count
                ))
            })
            .collect();

        session.close().await;
        Ok(content)
    }
}
