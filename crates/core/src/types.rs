// Chat model shared by the session layer and the tools

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A dialog (private chat, group or channel) as listed by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialog {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub unread_mentions_count: u32,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub archived: bool,
}

/// Reply to a dialog lookup: the matching dialog entries plus their top messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDialogs {
    pub dialogs: Vec<Dialog>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Author of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// A single message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub sender: Option<Sender>,
    #[serde(default)]
    pub text: Option<String>,
    /// Set for service messages (joins, pins, title changes)
    #[serde(default)]
    pub action: Option<String>,
}

impl Message {
    /// Text of a regular message, `None` for service messages and media without caption
    pub fn body(&self) -> Option<&str> {
        if self.action.is_some() {
            return None;
        }
        self.text.as_deref().filter(|text| !text.is_empty())
    }

    /// Username of the sender, or "Unknown"
    pub fn sender_name(&self) -> &str {
        self.sender
            .as_ref()
            .and_then(|s| s.username.as_deref())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Group,
    Channel,
}

/// A resolved user, group or channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub kind: EntityKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Filters passed through when enumerating dialogs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogFilter {
    pub archived: bool,
    pub ignore_pinned: bool,
}

/// Bounds for a message fetch. `reverse = false` yields newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    pub reverse: bool,
}

impl MessageQuery {
    pub fn newest_first(limit: Option<u32>) -> Self {
        Self {
            limit,
            reverse: false,
        }
    }
}
