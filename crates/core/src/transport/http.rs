//! HTTP transport for the chat gateway.

use crate::config::GatewayConfig;
use crate::error::{ChatError, ChatResult};
use reqwest::{header, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Header carrying the gateway session id on session-scoped requests.
pub const SESSION_HEADER: &str = "x-session-id";

/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<GatewayConfig>,
}

impl HttpTransport {
    pub fn new(config: Arc<GatewayConfig>) -> ChatResult<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(concat!("chatgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Build a URL for the given path.
    fn build_url(&self, path: &str) -> ChatResult<url::Url> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| ChatError::Config(format!("Invalid URL for {}: {}", path, e)))
    }

    fn scoped(&self, builder: RequestBuilder, session_id: &str) -> RequestBuilder {
        builder.header(SESSION_HEADER, session_id)
    }

    /// Execute a request with retries.
    async fn execute_with_retry(&self, request_builder: RequestBuilder) -> ChatResult<Response> {
        let retry_config = &self.config.retry_config;
        let mut attempts = 0;

        loop {
            let request = request_builder
                .try_clone()
                .ok_or_else(|| ChatError::Config("Request cannot be cloned".to_string()))?;

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if response.status().is_success() {
                        return Ok(response);
                    }

                    if attempts < retry_config.max_retries
                        && retry_config.should_retry_status(status)
                    {
                        let backoff = retry_config.backoff_for_attempt(attempts);
                        warn!(
                            status = status,
                            attempt = attempts + 1,
                            backoff_ms = backoff.as_millis(),
                            "Gateway request failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(ChatError::from_response(status, &body));
                }
                Err(e) => {
                    if attempts < retry_config.max_retries && e.is_timeout() {
                        let backoff = retry_config.backoff_for_attempt(attempts);
                        warn!(
                            attempt = attempts + 1,
                            backoff_ms = backoff.as_millis(),
                            "Gateway request timed out, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ChatResult<T> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ChatError::UnexpectedResultShape(e.to_string()))
    }

    /// Execute a session-scoped GET request with query parameters.
    pub async fn get<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        session_id: &str,
        path: &str,
        query: &Q,
    ) -> ChatResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "GET request");

        let request = self.scoped(self.client.get(url).query(query), session_id);
        let response = self.execute_with_retry(request).await?;
        Self::decode(response).await
    }

    /// Execute an unscoped POST request.
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> ChatResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "POST request");

        let response = self
            .execute_with_retry(self.client.post(url).json(body))
            .await?;
        Self::decode(response).await
    }

    /// Execute a session-scoped DELETE request without a response body.
    pub async fn delete(&self, session_id: &str, path: &str) -> ChatResult<()> {
        let url = self.build_url(path)?;
        debug!(url = %url, "DELETE request");

        let request = self.scoped(self.client.delete(url), session_id);
        self.execute_with_retry(request).await?;
        Ok(())
    }
}
