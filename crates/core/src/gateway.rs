//! Session provider backed by the chat gateway's HTTP API.
//!
//! Every `connect` opens a new gateway session (`POST v1/sessions`); requests
//! made through it carry the session id, and `disconnect` deletes it. Sessions
//! share one pooled HTTP client but never a session id.

use crate::config::GatewayConfig;
use crate::error::{ChatError, ChatResult};
use crate::session::{ChatSession, SessionProvider};
use crate::transport::HttpTransport;
use crate::types::{Dialog, DialogFilter, Entity, Message, MessageQuery, PeerDialogs};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    api_id: i64,
    api_hash: &'a str,
    session_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    session_id: String,
}

pub struct HttpSessionProvider {
    transport: HttpTransport,
}

impl HttpSessionProvider {
    pub fn new(config: GatewayConfig) -> ChatResult<Self> {
        Ok(Self {
            transport: HttpTransport::new(Arc::new(config))?,
        })
    }
}

#[async_trait::async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn connect(&self) -> ChatResult<Box<dyn ChatSession>> {
        let credentials = &self.transport.config().credentials;
        let request = CreateSessionRequest {
            api_id: credentials.api_id,
            api_hash: &credentials.api_hash,
            session_name: &credentials.session_name,
        };

        let response: CreateSessionResponse = self
            .transport
            .post("v1/sessions", &request)
            .await
            .map_err(|e| match e {
                ChatError::Connection(_) => e,
                other => ChatError::Connection(other.to_string()),
            })?;
        debug!(session_id = %response.session_id, "gateway session opened");

        Ok(Box::new(HttpSession {
            transport: self.transport.clone(),
            session_id: response.session_id,
        }))
    }
}

struct HttpSession {
    transport: HttpTransport,
    session_id: String,
}

/// Turn a 404 into `Ok(None)`.
fn optional<T>(result: ChatResult<T>) -> ChatResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ChatError::EntityNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait::async_trait]
impl ChatSession for HttpSession {
    async fn list_dialogs(&self, filter: &DialogFilter) -> ChatResult<Vec<Dialog>> {
        self.transport
            .get(&self.session_id, "v1/dialogs", filter)
            .await
    }

    async fn peer_dialogs(&self, dialog_id: i64) -> ChatResult<Option<PeerDialogs>> {
        let path = format!("v1/dialogs/{}", dialog_id);
        optional(self.transport.get(&self.session_id, &path, &()).await)
    }

    async fn messages(&self, entity_id: i64, query: &MessageQuery) -> ChatResult<Vec<Message>> {
        let path = format!("v1/dialogs/{}/messages", entity_id);
        self.transport.get(&self.session_id, &path, query).await
    }

    async fn entity(&self, entity_id: i64) -> ChatResult<Option<Entity>> {
        let path = format!("v1/entities/{}", entity_id);
        optional(self.transport.get(&self.session_id, &path, &()).await)
    }

    async fn disconnect(self: Box<Self>) -> ChatResult<()> {
        let path = format!("v1/sessions/{}", self.session_id);
        self.transport.delete(&self.session_id, &path).await?;
        debug!(session_id = %self.session_id, "gateway session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, RetryConfig};
    use crate::transport::SESSION_HEADER;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_provider(base_url: &str) -> HttpSessionProvider {
        let mut config = GatewayConfig::new(
            url::Url::parse(base_url).unwrap(),
            Credentials {
                api_id: 26162406,
                api_hash: "secret-hash".to_string(),
                session_name: "chatgate".to_string(),
            },
        );
        config.retry_config = RetryConfig::no_retry();
        config.timeout = Duration::from_secs(5);
        HttpSessionProvider::new(config).unwrap()
    }

    async fn mount_session(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .and(body_json(serde_json::json!({
                "api_id": 26162406,
                "api_hash": "secret-hash",
                "session_name": "chatgate"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"session_id": "s-42"})),
            )
            .mount(server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/v1/sessions/s-42"))
            .and(header(SESSION_HEADER, "s-42"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_list_dialogs_passes_filters() {
        let server = MockServer::start().await;
        mount_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/v1/dialogs"))
            .and(header(SESSION_HEADER, "s-42"))
            .and(query_param("archived", "true"))
            .and(query_param("ignore_pinned", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "name": "General", "unread_count": 2, "unread_mentions_count": 1}
            ])))
            .mount(&server)
            .await;

        let provider = create_provider(&server.uri());
        let session = provider.acquire().await.unwrap();

        let dialogs = session
            .list_dialogs(&DialogFilter {
                archived: true,
                ignore_pinned: false,
            })
            .await
            .unwrap();
        assert_eq!(dialogs.len(), 1);
        assert_eq!(dialogs[0].name, "General");
        assert_eq!(dialogs[0].unread_count, 2);

        session.close().await;
    }

    #[tokio::test]
    async fn test_messages_query() {
        let server = MockServer::start().await;
        mount_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/v1/dialogs/42/messages"))
            .and(query_param("limit", "3"))
            .and(query_param("reverse", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 3, "date": "2024-05-01T10:00:00Z", "text": "newest"},
                {"id": 2, "date": "2024-05-01T09:00:00Z", "text": "older"}
            ])))
            .mount(&server)
            .await;

        let provider = create_provider(&server.uri());
        let session = provider.acquire().await.unwrap();

        let messages = session
            .messages(42, &MessageQuery::newest_first(Some(3)))
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body(), Some("newest"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_unknown_peer_is_none() {
        let server = MockServer::start().await;
        mount_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/v1/dialogs/7"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"error": "not found"})))
            .mount(&server)
            .await;

        let provider = create_provider(&server.uri());
        let session = provider.acquire().await.unwrap();

        assert_eq!(session.peer_dialogs(7).await.unwrap(), None);
        session.close().await;
    }

    #[tokio::test]
    async fn test_session_creation_failure_is_connection_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({"error": "bad api hash"})))
            .mount(&server)
            .await;

        let provider = create_provider(&server.uri());
        let result = provider.acquire().await;
        match result {
            Err(ChatError::Connection(message)) => assert!(message.contains("bad api hash")),
            Err(other) => panic!("Expected Connection error, got {:?}", other),
            Ok(_) => panic!("Expected Connection error"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_connection_error() {
        // Nothing listens on port 9 (discard) in the test environment.
        let provider = create_provider("http://127.0.0.1:9/");
        let result = provider.acquire().await;
        assert!(matches!(result, Err(ChatError::Connection(_))));
    }
}
