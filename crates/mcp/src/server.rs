// MCP server: newline-delimited JSON-RPC over stdio
//
// Each `tools/call` runs in its own task so slow remote calls never hold up
// other requests. Responses funnel through one writer task. A
// `notifications/cancelled` aborts the matching task; the aborted handler's
// session guard releases the connection on drop.

use crate::protocol::{
    CallToolParams, CancelledParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo, ToolsCapability,
    PROTOCOL_VERSION,
};
use crate::tools::Dispatcher;
use anyhow::{Context, Result};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Upper bound for a single JSON-RPC line.
const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

type InFlight = Arc<Mutex<HashMap<String, AbortHandle>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashMap<String, AbortHandle>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Frame {
    Line(String),
    Skipped(&'static str),
}

/// `LinesCodec` that reports an unreadable line as a frame instead of an error.
/// `FramedRead` ends the stream after any decode error, but both cases below
/// leave the inner codec at the start of the next line.
struct RequestLines(LinesCodec);

impl RequestLines {
    fn recover(
        decoded: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Frame>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Skipped("line too long"))),
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(Frame::Skipped("line is not valid UTF-8")))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for RequestLines {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        Self::recover(self.0.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        Self::recover(self.0.decode_eof(buf))
    }
}

pub struct McpServer {
    dispatcher: Dispatcher,
    info: ServerInfo,
    max_line_length: usize,
}

impl McpServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            info: ServerInfo {
                name: "chatgate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    /// Longest request line accepted; longer lines get a parse error.
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Serve on the process's stdin/stdout until stdin closes.
    pub async fn start(self) -> Result<()> {
        info!(tools = self.dispatcher.list_tools().len(), "MCP server listening on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut lines = FramedRead::new(
            reader,
            RequestLines(LinesCodec::new_with_max_length(self.max_line_length)),
        );
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

        let writer_task = tokio::spawn(async move {
            let mut sink = FramedWrite::new(writer, LinesCodec::new());
            while let Some(response) = rx.recv().await {
                let line = serde_json::to_string(&response).context("Failed to encode response")?;
                sink.send(line).await.context("Failed to write response")?;
            }
            Ok::<_, anyhow::Error>(())
        });

        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(Frame::Line(line)) => line,
                Ok(Frame::Skipped(reason)) => {
                    warn!(reason, "Request line skipped");
                    let _ = tx.send(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error()));
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read from stdin");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    debug!(error = %e, "Unparseable request");
                    let _ = tx.send(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error()));
                    continue;
                }
            };

            self.handle(request, &tx, &in_flight);
        }

        debug!("stdin closed, shutting down");
        let pending: Vec<AbortHandle> = lock(&in_flight).drain().map(|(_, h)| h).collect();
        for handle in pending {
            handle.abort();
        }
        drop(tx);
        writer_task.await.context("Writer task failed")??;
        Ok(())
    }

    fn handle(
        &self,
        request: JsonRpcRequest,
        tx: &mpsc::UnboundedSender<JsonRpcResponse>,
        in_flight: &InFlight,
    ) {
        if request.jsonrpc != "2.0" {
            if let Some(id) = request.id {
                let _ = tx.send(JsonRpcResponse::error(id, JsonRpcError::invalid_request()));
            }
            return;
        }

        let Some(id) = request.id else {
            self.handle_notification(&request.method, request.params, in_flight);
            return;
        };

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability {
                            list_changed: false,
                        }),
                    },
                    server_info: self.info.clone(),
                },
            ),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::success(
                id,
                ListToolsResult {
                    tools: self.dispatcher.list_tools(),
                },
            ),
            "tools/call" => {
                let params: CallToolParams =
                    match serde_json::from_value(request.params.unwrap_or(Value::Null)) {
                        Ok(params) => params,
                        Err(e) => {
                            let _ = tx.send(JsonRpcResponse::error(
                                id,
                                JsonRpcError::invalid_params(e.to_string()),
                            ));
                            return;
                        }
                    };
                self.spawn_call(id, params, tx.clone(), in_flight.clone());
                return;
            }
            method => JsonRpcResponse::error(id, JsonRpcError::method_not_found(method)),
        };

        let _ = tx.send(response);
    }

    fn handle_notification(&self, method: &str, params: Option<Value>, in_flight: &InFlight) {
        match method {
            "notifications/initialized" => info!("Client initialized"),
            "notifications/cancelled" => {
                let Some(params) = params
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
                else {
                    warn!("Malformed cancellation notice");
                    return;
                };
                let key = params.request_id.to_string();
                if let Some(handle) = lock(in_flight).remove(&key) {
                    info!(request_id = %key, reason = ?params.reason, "Cancelling tool call");
                    handle.abort();
                }
            }
            other => debug!(method = other, "Ignoring notification"),
        }
    }

    fn spawn_call(
        &self,
        id: Value,
        params: CallToolParams,
        tx: mpsc::UnboundedSender<JsonRpcResponse>,
        in_flight: InFlight,
    ) {
        // Keyed on the JSON text, so `1` and `"1"` stay distinct
        let key = id.to_string();
        let dispatcher = self.dispatcher.clone();
        let registry = in_flight.clone();
        let task_key = key.clone();

        // Hold the lock across spawn so the task cannot deregister before it is registered
        let mut guard = lock(&in_flight);
        let handle = tokio::spawn(async move {
            let result = dispatcher.call_tool(&params.name, params.arguments).await;
            lock(&registry).remove(&task_key);
            let _ = tx.send(JsonRpcResponse::success(id, result));
        });
        guard.insert(key, handle.abort_handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::chat_tools;
    use chatgate_core::{Dialog, FileExportSink, MemoryChatService};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

    struct Client {
        input: DuplexStream,
        output: Lines<BufReader<DuplexStream>>,
    }

    impl Client {
        async fn send(&mut self, message: Value) {
            let mut line = serde_json::to_string(&message).unwrap();
            line.push('\n');
            self.input.write_all(line.as_bytes()).await.unwrap();
        }

        async fn send_raw(&mut self, line: &str) {
            self.input.write_all(line.as_bytes()).await.unwrap();
            self.input.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
                .await
                .expect("timed out waiting for response")
                .unwrap()
                .expect("server closed output");
            serde_json::from_str(&line).unwrap()
        }
    }

    fn start(service: &MemoryChatService) -> (Client, tokio::task::JoinHandle<Result<()>>) {
        let dir = std::env::temp_dir().join("chatgate-server-tests");
        let registry = chat_tools(
            Arc::new(service.clone()),
            Arc::new(FileExportSink::new(dir)),
        )
        .unwrap();
        let server = McpServer::new(Dispatcher::new(registry)).with_max_line_length(4096);

        let (client_in, server_in) = duplex(64 * 1024);
        let (server_out, client_out) = duplex(64 * 1024);
        let task = tokio::spawn(server.serve(server_in, server_out));

        (
            Client {
                input: client_in,
                output: BufReader::new(client_out).lines(),
            },
            task,
        )
    }

    fn service() -> MemoryChatService {
        MemoryChatService::new().with_dialog(Dialog {
            id: 42,
            name: "Team".to_string(),
            unread_count: 2,
            unread_mentions_count: 1,
            pinned: false,
            archived: false,
        })
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let (mut client, _task) = start(&service());

        client
            .send(json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "test", "version": "0.0.0"}
                }
            }))
            .await;
        let response = client.recv().await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["serverInfo"]["name"], "chatgate");
        assert_eq!(response["result"]["capabilities"]["tools"]["listChanged"], false);

        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        client
            .send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await;
        let response = client.recv().await;
        assert_eq!(response["id"], 2);
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 3);
        assert_eq!(tools[0]["name"], "ListDialogs");
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn test_tool_call_success_and_errors() {
        let (mut client, _task) = start(&service());

        client
            .send(json!({
                "jsonrpc": "2.0", "id": "a", "method": "tools/call",
                "params": {"name": "ListDialogs", "arguments": {"unread": true}}
            }))
            .await;
        let response = client.recv().await;
        assert_eq!(response["id"], "a");
        assert_eq!(
            response["result"],
            json!({"content": [{"type": "text", "text": "name='Team' id=42 unread=2 mentions=1"}]})
        );

        client
            .send(json!({
                "jsonrpc": "2.0", "id": "b", "method": "tools/call",
                "params": {"name": "DropTables", "arguments": {}}
            }))
            .await;
        let response = client.recv().await;
        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            response["result"]["content"][0]["text"],
            "Error: Unknown tool: DropTables"
        );
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let (mut client, _task) = start(&service());

        client.send_raw("{not json").await;
        let response = client.recv().await;
        assert_eq!(response["error"]["code"], -32700);

        client
            .send(json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}))
            .await;
        let response = client.recv().await;
        assert_eq!(response["error"]["code"], -32601);

        client
            .send(json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": {}}))
            .await;
        let response = client.recv().await;
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_cancelled_call_releases_session() {
        let service = service()
            .with_messages(42, vec![])
            .stall_messages();
        let (mut client, _task) = start(&service);

        client
            .send(json!({
                "jsonrpc": "2.0", "id": 9, "method": "tools/call",
                "params": {"name": "ListMessages", "arguments": {"dialog_id": 42}}
            }))
            .await;

        for _ in 0..500 {
            if !service.queries().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(service.acquired(), 1);
        assert_eq!(service.released(), 0);

        client
            .send(json!({
                "jsonrpc": "2.0", "method": "notifications/cancelled",
                "params": {"requestId": 9, "reason": "user aborted"}
            }))
            .await;

        for _ in 0..500 {
            if service.released() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(service.released(), 1);

        // The server keeps serving after a cancellation
        client
            .send(json!({"jsonrpc": "2.0", "id": 10, "method": "ping"}))
            .await;
        let response = client.recv().await;
        assert_eq!(response["id"], 10);
    }

    #[tokio::test]
    async fn test_shutdown_on_eof() {
        let (client, task) = start(&service());
        drop(client);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unreadable_lines_do_not_stop_server() {
        let (mut client, task) = start(&service());

        let oversized = format!("{{\"pad\": \"{}\"}}", "x".repeat(10_000));
        client.send_raw(&oversized).await;
        let response = client.recv().await;
        assert_eq!(response["error"]["code"], -32700);

        client.input.write_all(b"\xff\xfe\n").await.unwrap();
        let response = client.recv().await;
        assert_eq!(response["error"]["code"], -32700);

        client
            .send(json!({"jsonrpc": "2.0", "id": 11, "method": "ping"}))
            .await;
        let response = client.recv().await;
        assert_eq!(response["id"], 11);
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn test_numeric_and_string_ids_cancel_separately() {
        let service = service().with_messages(42, vec![]).stall_messages();
        let (mut client, _task) = start(&service);

        for id in [json!(1), json!("1")] {
            client
                .send(json!({
                    "jsonrpc": "2.0", "id": id, "method": "tools/call",
                    "params": {"name": "ListMessages", "arguments": {"dialog_id": 42}}
                }))
                .await;
        }
        for _ in 0..500 {
            if service.queries().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(service.acquired(), 2);

        for id in [json!("1"), json!(1)] {
            client
                .send(json!({
                    "jsonrpc": "2.0", "method": "notifications/cancelled",
                    "params": {"requestId": id}
                }))
                .await;
        }
        for _ in 0..500 {
            if service.released() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(service.released(), 2);
    }

    #[test]
    fn test_in_flight_lock_survives_poisoning() {
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
        let holder = in_flight.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.lock().unwrap();
            panic!("handler thread died");
        })
        .join();

        assert!(in_flight.is_poisoned());
        assert!(lock(&in_flight).is_empty());
    }
}
