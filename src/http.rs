use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, SeqMcpError};
use crate::mcp::{McpServer, RpcRequest};
use crate::tools::ToolName;

type Sessions = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Event>>>>;

/// 随 SSE 响应流一起释放，客户端断开时移除会话。
struct SessionGuard {
    sessions: Sessions,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session_id);
        info!(session_id = %self.session_id, "sse session closed");
    }
}

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer>,
    pub sessions: Sessions,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

/// 直接以 HTTP 调用某个工具，返回结果列表。
async fn tool_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let args = match payload {
        Ok(Json(v)) => v,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
        }
    };
    let tool = match name.parse::<ToolName>() {
        Ok(t) => t,
        Err(e) => return error_response(StatusCode::NOT_FOUND, e.to_string()),
    };

    // 客户端断开时 axum 会丢弃该 future，进行中的 Seq 请求随之被丢弃
    let cancel = CancellationToken::new();
    match state.server.tools().call(tool, args, &cancel).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) if e.is_caller_error() => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let session_id = format!("{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0));

    // MCP 要求首个事件给出消息端点（相对 URI）
    let endpoint_url = format!("/message?session_id={}", session_id);
    let _ = tx.send(Event::default().event("endpoint").data(endpoint_url));

    state
        .sessions
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(session_id.clone(), tx);
    info!(%session_id, "sse session opened");

    let guard = SessionGuard {
        sessions: state.sessions.clone(),
        session_id,
    };
    let stream = UnboundedReceiverStream::new(rx).map(move |ev| {
        let _session = &guard;
        Ok::<_, axum::Error>(ev)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn message_handler(
    State(state): State<AppState>,
    Query(q): Query<MessageQuery>,
    payload: std::result::Result<Json<RpcRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid message: {e}")),
    };
    let sender = {
        let sessions = state.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(&q.session_id).cloned()
    };

    let Some(sender) = sender else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let server = state.server.clone();
    let sessions = state.sessions.clone();
    let session_id = q.session_id;
    tokio::spawn(async move {
        let Some(resp) = server.process_request(req).await else {
            return;
        };
        match serde_json::to_string(&resp) {
            Ok(json_str) => {
                if sender.send(Event::default().event("message").data(json_str)).is_err() {
                    warn!(%session_id, "sse session closed, dropping it");
                    sessions
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&session_id);
                }
            }
            Err(e) => warn!("failed to encode response: {e}"),
        }
    });
    StatusCode::ACCEPTED.into_response()
}

pub fn build_router(server: Arc<McpServer>) -> Router {
    router_with_state(AppState {
        server,
        sessions: Arc::new(RwLock::new(HashMap::new())),
    })
}

fn router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/tools/:name", post(tool_handler))
        .route("/sse", get(sse_handler))
        .route("/message", post(message_handler))
        .with_state(state)
}

pub async fn serve_http(cfg: &ServerConfig, server: Arc<McpServer>) -> Result<()> {
    let router = build_router(server);

    let addr = format!(
        "{}:{}",
        cfg.http_addr.as_deref().unwrap_or("0.0.0.0"),
        cfg.http_port.unwrap_or(3000)
    );
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| SeqMcpError::Config(format!("bind {addr} failed: {e}")))?;
    info!("HTTP server listening on http://{}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

/// stdio 与 HTTP 同时服务。stdin 关闭后 HTTP 继续运行，任一端出错即返回。
pub async fn serve_alongside<F>(stdio: F, cfg: &ServerConfig, server: Arc<McpServer>) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let stdio = async {
        stdio.await?;
        info!("stdio transport finished, HTTP keeps serving");
        Ok::<_, SeqMcpError>(())
    };
    tokio::try_join!(stdio, serve_http(cfg, server))?;
    Ok(())
}
