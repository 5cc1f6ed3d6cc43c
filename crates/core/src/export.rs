//! Export sink for tools that persist their results.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid export name: {0}")]
    InvalidName(String),
}

/// One exported message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub date: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub username: String,
    pub message: String,
    pub hashtag: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Txt,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Txt => "txt",
        }
    }
}

/// Writes records somewhere and reports where.
#[async_trait::async_trait]
pub trait ExportSink: Send + Sync {
    /// Write `records` under `name` and return the location written.
    async fn write(
        &self,
        name: &str,
        records: &[ExportRecord],
        format: ExportFormat,
    ) -> Result<String, ExportError>;
}

/// Writes exports as files into a directory.
pub struct FileExportSink {
    output_dir: PathBuf,
}

impl FileExportSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

/// A bare file stem: no separators, no parent references.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

fn render_csv(records: &[ExportRecord]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["date", "user_id", "username", "message", "hashtag"])?;
    for record in records {
        let user_id = record.user_id.map(|id| id.to_string()).unwrap_or_default();
        writer.write_record([
            record.date.to_rfc3339().as_str(),
            user_id.as_str(),
            record.username.as_str(),
            record.message.as_str(),
            record.hashtag.as_str(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

fn render_txt(records: &[ExportRecord]) -> Vec<u8> {
    let mut output = String::new();
    for record in records {
        let user_id = record
            .user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        output.push_str(&format!("Date: {}\n", record.date.to_rfc3339()));
        output.push_str(&format!("User: {} (ID: {})\n", record.username, user_id));
        output.push_str(&format!("Message: {}\n", record.message));
        output.push_str(&format!("Hashtag: {}\n", record.hashtag));
        output.push_str(&"-".repeat(50));
        output.push('\n');
    }
    output.into_bytes()
}

#[async_trait::async_trait]
impl ExportSink for FileExportSink {
    async fn write(
        &self,
        name: &str,
        records: &[ExportRecord],
        format: ExportFormat,
    ) -> Result<String, ExportError> {
        if !is_valid_name(name) {
            return Err(ExportError::InvalidName(name.to_string()));
        }

        let contents = match format {
            ExportFormat::Csv => render_csv(records)?,
            ExportFormat::Txt => render_txt(records),
        };

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self
            .output_dir
            .join(format!("{}.{}", name, format.extension()));
        tokio::fs::write(&path, contents).await?;

        info!(path = %path.display(), records = records.len(), "Export written");
        Ok(path.display().to_string())
    }
}
