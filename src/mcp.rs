use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::tools::{SeqTools, ToolName};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError { code, message }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledParams {
    request_id: Value,
}

/// MCP 请求处理：协议方法分发 + 进行中调用的取消。
pub struct McpServer {
    tools: Arc<SeqTools>,
    inflight: Mutex<HashMap<String, CancellationToken>>,
}

impl McpServer {
    pub fn new(tools: Arc<SeqTools>) -> Self {
        Self {
            tools,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn tools(&self) -> &SeqTools {
        &self.tools
    }

    /// 处理一条 JSON-RPC 消息。通知（无 id）返回 None。
    pub async fn process_request(&self, req: RpcRequest) -> Option<RpcResponse> {
        match self.begin(&req) {
            Ok(token) => self.dispatch(req, token).await,
            Err(resp) => Some(resp),
        }
    }

    /// 工具调用在执行前登记取消令牌；同一 id 已在进行中时直接拒绝。
    fn begin(&self, req: &RpcRequest) -> std::result::Result<CancellationToken, RpcResponse> {
        let token = CancellationToken::new();
        let Some(key) = inflight_key(req) else {
            return Ok(token);
        };
        let mut inflight = self.lock_inflight();
        if inflight.contains_key(&key) {
            warn!(id = %req.id, "duplicate in-flight request id");
            return Err(RpcResponse::err(
                req.id.clone(),
                -32600,
                format!("request id {} is already in flight", req.id),
            ));
        }
        inflight.insert(key, token.clone());
        Ok(token)
    }

    async fn dispatch(&self, req: RpcRequest, token: CancellationToken) -> Option<RpcResponse> {
        debug!(method = %req.method, id = %req.id, "rpc request");
        let key = inflight_key(&req);
        let resp = self.route(req, &token).await;
        if let Some(k) = key {
            self.lock_inflight().remove(&k);
        }
        resp
    }

    async fn route(&self, req: RpcRequest, token: &CancellationToken) -> Option<RpcResponse> {
        let method = req.method.clone();
        let resp = match method.as_str() {
            "initialize" => RpcResponse::ok(req.id, initialize_result()),
            "notifications/initialized" => return None,
            "notifications/cancelled" => {
                self.cancel(&req.params);
                return None;
            }
            "ping" => RpcResponse::ok(req.id, json!({})),
            "tools/list" | "list_tools" => {
                RpcResponse::ok(req.id, json!({ "tools": tool_definitions() }))
            }
            "tools/call" => self.handle_tool_call(req, token).await,
            other => match other.parse::<ToolName>() {
                // 兼容直接以工具名作为方法调用
                Ok(tool) => self.handle_direct_call(tool, req, token).await,
                Err(_) if req.id.is_null() => return None,
                Err(_) => RpcResponse::err(req.id, -32601, format!("method not found: {other}")),
            },
        };
        Some(resp)
    }

    async fn handle_tool_call(&self, req: RpcRequest, token: &CancellationToken) -> RpcResponse {
        let params: ToolCallParams = match serde_json::from_value(req.params) {
            Ok(p) => p,
            Err(e) => return RpcResponse::err(req.id, -32602, format!("invalid params: {e}")),
        };
        let tool = match params.name.parse::<ToolName>() {
            Ok(t) => t,
            Err(e) => return RpcResponse::err(req.id, -32602, e.to_string()),
        };
        let (text, is_error) = match self.tools.call(tool, params.arguments, token).await {
            Ok(value) => (value.to_string(), false),
            Err(e) => (e.to_string(), true),
        };
        RpcResponse::ok(
            req.id,
            json!({
                "content": [{ "type": "text", "text": text }],
                "isError": is_error
            }),
        )
    }

    async fn handle_direct_call(
        &self,
        tool: ToolName,
        req: RpcRequest,
        token: &CancellationToken,
    ) -> RpcResponse {
        match self.tools.call(tool, req.params, token).await {
            Ok(value) => RpcResponse::ok(req.id, value),
            Err(e) if e.is_caller_error() => RpcResponse::err(req.id, -32602, e.to_string()),
            Err(e) => RpcResponse::err(req.id, -32002, e.to_string()),
        }
    }

    fn cancel(&self, params: &Value) {
        let Ok(p) = serde_json::from_value::<CancelledParams>(params.clone()) else {
            warn!("malformed cancellation notification");
            return;
        };
        match self.lock_inflight().get(&p.request_id.to_string()) {
            Some(token) => {
                info!(request_id = %p.request_id, "cancelling in-flight request");
                token.cancel();
            }
            None => debug!(request_id = %p.request_id, "cancellation for unknown request"),
        }
    }

    fn lock_inflight(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn inflight_len(&self) -> usize {
        self.lock_inflight().len()
    }
}

fn is_tool_call(method: &str) -> bool {
    method == "tools/call" || method.parse::<ToolName>().is_ok()
}

fn inflight_key(req: &RpcRequest) -> Option<String> {
    (is_tool_call(&req.method) && !req.id.is_null()).then(|| req.id.to_string())
}

/// stdio 传输：每行一条 JSON-RPC 消息。
///
/// 工具调用在独立任务中执行，以便 `notifications/cancelled` 能及时生效。
pub async fn run_stdio(server: Arc<McpServer>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<RpcResponse>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(resp) = rx.recv().await {
            if let Err(e) = write_response(&mut stdout, &resp).await {
                warn!("failed to write response: {e}");
                break;
            }
        }
    });

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let req: RpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(RpcResponse::err(Value::Null, -32700, format!("parse error: {e}")));
                continue;
            }
        };

        if is_tool_call(&req.method) {
            // 先登记再派发，随后读到的取消通知一定能找到令牌
            let token = match server.begin(&req) {
                Ok(token) => token,
                Err(resp) => {
                    let _ = tx.send(resp);
                    continue;
                }
            };
            let server = server.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(resp) = server.dispatch(req, token).await {
                    let _ = tx.send(resp);
                }
            });
        } else if let Some(resp) = server.process_request(req).await {
            let _ = tx.send(resp);
        }
    }

    info!("stdin closed, waiting for in-flight requests");
    drop(tx);
    let _ = writer.await;
    Ok(())
}

async fn write_response(stdout: &mut tokio::io::Stdout, resp: &RpcResponse) -> Result<()> {
    let line = serde_json::to_string(resp)?;
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn workspace_schema() -> Value {
    json!({ "type": "string", "description": "Workspace (tenant) name; defaults to the configured default workspace." })
}

fn hours_schema() -> Value {
    json!({ "type": "integer", "minimum": 1, "maximum": 8760, "default": 24, "description": "Lookback window in hours." })
}

fn count_schema(max: i64, default: i64) -> Value {
    json!({ "type": "integer", "minimum": 1, "maximum": max, "default": default, "description": "Maximum number of results." })
}

pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": ToolName::SeqSearch.as_str(),
            "description": "Search Seq events with a raw filter expression.",
            "inputSchema": {
                "type": "object",
                "required": ["filter"],
                "properties": {
                    "filter": { "type": "string", "description": "Seq filter expression, passed through verbatim." },
                    "count": count_schema(1000, 100),
                    "workspace": workspace_schema()
                }
            }
        }),
        json!({
            "name": ToolName::SeqWaitForEvents.as_str(),
            "description": "Wait up to 5 seconds for new live events and return what arrived.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "filter": { "type": "string", "description": "Optional Seq filter; omit to match everything." },
                    "count": count_schema(100, 10),
                    "workspace": workspace_schema()
                }
            }
        }),
        json!({
            "name": ToolName::SignalList.as_str(),
            "description": "List shared saved searches (signals).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "workspace": workspace_schema()
                }
            }
        }),
        json!({
            "name": ToolName::AppSearch.as_str(),
            "description": "Search events of one application by level, time window and function name.",
            "inputSchema": {
                "type": "object",
                "required": ["app"],
                "properties": {
                    "app": { "type": "string", "description": "Application name or alias." },
                    "level": { "type": "string", "enum": ["error", "warning", "info", "all"], "default": "all" },
                    "hours": hours_schema(),
                    "function": { "type": "string", "description": "Optional FunctionName filter." },
                    "count": count_schema(500, 50),
                    "workspace": workspace_schema()
                }
            }
        }),
        json!({
            "name": ToolName::InvocationTrace.as_str(),
            "description": "All events of one function invocation, in server order.",
            "inputSchema": {
                "type": "object",
                "required": ["invocationId"],
                "properties": {
                    "invocationId": { "type": "string" },
                    "workspace": workspace_schema()
                }
            }
        }),
        json!({
            "name": ToolName::SlowExecutions.as_str(),
            "description": "Events whose DurationMs exceeds a threshold, most recent first (not sorted by duration).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "thresholdMs": { "type": "integer", "minimum": 1, "default": 5000 },
                    "app": { "type": "string", "description": "Optional application name or alias." },
                    "function": { "type": "string", "description": "Optional FunctionName filter." },
                    "hours": hours_schema(),
                    "count": count_schema(100, 20),
                    "workspace": workspace_schema()
                }
            }
        }),
        json!({
            "name": ToolName::EntityTrace.as_str(),
            "description": "Events that mention one business entity.",
            "inputSchema": {
                "type": "object",
                "required": ["entityType", "entityId"],
                "properties": {
                    "entityType": { "type": "string" },
                    "entityId": { "type": "string" },
                    "hours": hours_schema(),
                    "count": count_schema(200, 100),
                    "workspace": workspace_schema()
                }
            }
        }),
        json!({
            "name": ToolName::ErrorDashboard.as_str(),
            "description": "Raw error events for the time window, optionally for one application.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "hours": hours_schema(),
                    "app": { "type": "string", "description": "Optional application name or alias." },
                    "count": count_schema(500, 200),
                    "workspace": workspace_schema()
                }
            }
        }),
    ]
}
