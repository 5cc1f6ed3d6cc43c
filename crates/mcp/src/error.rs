//! Error types for tool dispatch.

use chatgate_core::{ChatError, ExportError};
use std::fmt;

/// A single argument that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path of the offending field, empty for the payload itself.
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

struct FieldErrors<'a>(&'a [FieldError]);

impl fmt::Display for FieldErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

/// Everything that can go wrong between a `tools/call` and its result.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {}", FieldErrors(.0))]
    InvalidArguments(Vec<FieldError>),

    /// No handler bound for a resolved argument type.
    #[error("Unsupported tool arguments: {0}")]
    UnsupportedTool(String),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Tool handler panicked: {0}")]
    Panicked(String),
}

impl ToolError {
    /// Field names reported by an `InvalidArguments` error.
    pub fn invalid_fields(&self) -> Vec<&str> {
        match self {
            Self::InvalidArguments(errors) => errors.iter().map(|e| e.field.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Faults in the tool set itself, raised while building the registry at startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool '{0}' is registered twice")]
    DuplicateTool(String),

    #[error("Arguments of type {0} already have a handler")]
    DuplicateArgumentType(&'static str),

    #[error("Tool '{0}' has no description; document its argument type")]
    MissingDescription(String),

    #[error("Invalid input schema for tool '{tool}': {message}")]
    InvalidSchema { tool: String, message: String },
}
