//! Error types for the chat session layer.

use serde::{Deserialize, Serialize};

/// Result type for session operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Failures surfaced by a [`SessionProvider`](crate::session::SessionProvider)
/// or by the sessions it hands out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The session could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A remote id did not resolve.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// The remote reply did not have the expected structure.
    #[error("Unexpected result shape: {0}")]
    UnexpectedResultShape(String),

    /// The remote service reported a fault.
    #[error("Upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },

    /// A remote call exceeded the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// Invalid provider configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    /// Build an error from a non-success gateway response.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<ErrorResponse>(body) {
            Ok(error_response) => match error_response.details {
                Some(details) => format!("{} ({})", error_response.error, details),
                None => error_response.error,
            },
            Err(_) => body.to_string(),
        };

        if status == 404 {
            Self::EntityNotFound(message)
        } else {
            Self::Upstream { status, message }
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::UnexpectedResultShape(err.to_string())
        } else {
            Self::Upstream {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}

/// Error body returned by the chat gateway.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_structured_body() {
        let err = ChatError::from_response(502, r#"{"error":"flood wait","details":"30s"}"#);
        assert_eq!(
            err,
            ChatError::Upstream {
                status: 502,
                message: "flood wait (30s)".to_string()
            }
        );
    }

    #[test]
    fn test_from_response_404_is_not_found() {
        let err = ChatError::from_response(404, "no such peer");
        assert_eq!(err, ChatError::EntityNotFound("no such peer".to_string()));
    }

    #[test]
    fn test_display() {
        assert_eq!(ChatError::Timeout.to_string(), "Request timed out");
        assert_eq!(
            ChatError::Connection("refused".to_string()).to_string(),
            "Connection error: refused"
        );
    }
}
