// SearchHashtags tool
//
// Scans a group's history for hashtags and hands the matches to the export
// sink. Gateway credentials come from the session provider's configuration,
// never from the call arguments.

use crate::error::{FieldError, ToolError};
use crate::protocol::ContentItem;
use crate::tools::{ToolArgs, ToolHandler};
use chatgate_core::export::is_valid_name;
use chatgate_core::{
    ChatError, ChatSession, ExportFormat, ExportRecord, ExportSink, Message, MessageQuery,
    SessionProvider,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Search for specific hashtags in a group and export the matching messages to a CSV or text file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchHashtags {
    /// Group or channel to search
    pub group_id: i64,
    /// Hashtags to look for, matched case-insensitively anywhere in the text
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub output_format: ExportFormat,
    /// File name without extension
    #[serde(default = "default_output_file")]
    pub output_file: String,
    /// Only scan this many of the most recent messages
    #[serde(default)]
    pub limit: Option<u32>,
}

fn default_output_file() -> String {
    "hashtag_results".to_string()
}

impl ToolArgs for SearchHashtags {
    fn check(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.hashtags.is_empty() {
            errors.push(FieldError::new("hashtags", "at least one hashtag is required"));
        }
        if self.hashtags.iter().any(|tag| tag.trim().is_empty()) {
            errors.push(FieldError::new("hashtags", "hashtags must not be blank"));
        }
        if !is_valid_name(&self.output_file) {
            errors.push(FieldError::new(
                "output_file",
                "must be a plain file name without path separators",
            ));
        }
        errors
    }
}

impl SearchHashtags {
    /// First hashtag found in `text`, if any.
    fn first_match(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.hashtags
            .iter()
            .find(|tag| text.contains(&tag.to_lowercase()))
            .map(String::as_str)
    }

    fn record(&self, message: &Message) -> Option<ExportRecord> {
        let body = message.body()?;
        let hashtag = self.first_match(body)?;
        Some(ExportRecord {
            date: message.date,
            user_id: message.sender_id,
            username: message.sender_name().to_string(),
            message: body.to_string(),
            hashtag: hashtag.to_string(),
        })
    }
}

pub struct SearchHashtagsTool {
    sessions: Arc<dyn SessionProvider>,
    sink: Arc<dyn ExportSink>,
}

impl SearchHashtagsTool {
    pub fn new(sessions: Arc<dyn SessionProvider>, sink: Arc<dyn ExportSink>) -> Self {
        Self { sessions, sink }
    }
}

#[async_trait::async_trait]
impl ToolHandler for SearchHashtagsTool {
    type Args = SearchHashtags;

    async fn call(&self, args: SearchHashtags) -> Result<Vec<ContentItem>, ToolError> {
        let session = self.sessions.acquire().await?;

        let group = session
            .entity(args.group_id)
            .await?
            .ok_or_else(|| ChatError::EntityNotFound(format!("Group not found: {}", args.group_id)))?;
        let messages = session
            .messages(group.id, &MessageQuery::newest_first(args.limit))
            .await?;
        session.close().await;

        let records: Vec<ExportRecord> = messages.iter().filter_map(|m| args.record(m)).collect();
        let location = self
            .sink
            .write(&args.output_file, &records, args.output_format)
            .await?;

        Ok(vec![ContentItem::text(format!(
            "Successfully exported {} messages with hashtags {} to {}",
            records.len(),
            args.hashtags.join(", "),
            location
        ))])
    }
}
