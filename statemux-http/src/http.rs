use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use statemux_core::ToolRegistry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiJson, ErrorResponse, GatewayError};
use crate::jsonrpc::{RpcRequest, RpcResponse, SERVER_ERROR};
use crate::router::{self, session_header, SESSION_ID_HEADER};
use crate::session::{start_reaper, Dispatch, DispatchContext, SessionStore, SessionStoreConfig};
use crate::streaming::create_sse_stream;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Route of the JSON-RPC endpoint
    pub path: String,
    pub sessions: SessionStoreConfig,
    /// How often the idle reaper runs
    pub reap_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            path: "/mcp".to_string(),
            sessions: SessionStoreConfig::default(),
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Configuration via environment variables:
    /// - `STATEMUX_HOST`: bind address (default: 0.0.0.0)
    /// - `STATEMUX_PORT` or `PORT`: listen port (default: 3001)
    /// - `STATEMUX_MAX_SESSIONS`: session cap, 0 for unlimited (default: 100)
    /// - `STATEMUX_SESSION_IDLE_SECS`: idle eviction, 0 to disable (default: 1800)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("STATEMUX_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse("STATEMUX_PORT").or_else(|| env_parse("PORT")) {
            config.port = port;
        }
        if let Some(max) = env_parse::<usize>("STATEMUX_MAX_SESSIONS") {
            config.sessions.max_sessions = (max > 0).then_some(max);
        }
        if let Some(secs) = env_parse::<u64>("STATEMUX_SESSION_IDLE_SECS") {
            config.sessions.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}

/// Shared application state passed to axum handlers
#[derive(Clone)]
pub struct ServerState {
    pub sessions: Arc<SessionStore>,
    pub dispatch: DispatchContext,
}

impl ServerState {
    pub fn new(config: &ServerConfig, tools: ToolRegistry) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new(config.sessions.clone())),
            dispatch: DispatchContext::new(tools),
        }
    }
}

/// Build the axum router with all routes
pub fn build_router(state: ServerState, path: &str) -> Router {
    Router::new()
        .route(path, post(handle_post).delete(handle_delete).get(handle_get))
        .route("/health", get(handle_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
    }
    response
}

async fn handle_post(
    State(state): State<ServerState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<RpcRequest>,
) -> Response {
    let http_request_id = Uuid::new_v4().to_string();
    let id = request.id_or_null();
    info!("[{}] POST {}", http_request_id, request.method);

    let admission = match router::resolve(&state.sessions, session_header(&headers), &request).await {
        Ok(admission) => admission,
        Err(err) => {
            warn!("[{}] Rejected: {}", http_request_id, err);
            return ErrorResponse::new(err, id).into_response();
        }
    };

    let session = admission.session;
    if admission.created {
        info!("[{}] - [{}] Session initialized", http_request_id, session.id());
    }

    let response = match session.dispatch(&http_request_id, request, &state.dispatch).await {
        Ok(Dispatch::Reply(envelope)) => Json(envelope).into_response(),
        Ok(Dispatch::Accepted) => StatusCode::ACCEPTED.into_response(),
        Ok(Dispatch::Stream(frames)) => create_sse_stream(frames).into_response(),
        Err(err) => ErrorResponse::new(err, id).into_response(),
    };

    with_session_header(response, session.id())
}

async fn handle_delete(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return ErrorResponse::from(GatewayError::BadRequest(
            "No valid session ID provided".to_string(),
        ))
        .into_response();
    };

    match state.sessions.terminate(session_id).await {
        Ok(()) => {
            info!("[{}] Closing session", session_id);
            StatusCode::OK.into_response()
        }
        Err(err) => {
            warn!("[{}] Cannot close session: {}", session_id, err);
            ErrorResponse::from(err).into_response()
        }
    }
}

async fn handle_get() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST, DELETE")],
        Json(RpcResponse::error(Value::Null, SERVER_ERROR, "Method not allowed.")),
    )
        .into_response()
}

async fn handle_health(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "sessions": state.sessions.len().await,
        "tools": state.dispatch.tools.len(),
    }))
}

/// Handle returned by [`start_server`]; keeps the server and reaper tasks alive
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: ServerState,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    reaper: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.state.sessions
    }

    /// Stop accepting requests, close every session and wait for in-flight
    /// responses to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();

        // closing sessions ends their open streams, which lets the server drain
        let closed = self.state.sessions.close_all().await;
        info!("Closed {} session(s)", closed);

        if let Err(e) = self.server.await {
            warn!("server task ended abnormally: {}", e);
        }
        if let Some(reaper) = self.reaper {
            let _ = reaper.await;
        }
    }
}

/// Bind and start serving. Returns once the listener is bound.
pub async fn start_server(config: ServerConfig, tools: ToolRegistry) -> std::io::Result<ServerHandle> {
    let state = ServerState::new(&config, tools);
    let router = build_router(state.clone(), &config.path);

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let reaper = start_reaper(state.sessions.clone(), config.reap_interval, shutdown.clone());

    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        {
            warn!("server error: {}", e);
        }
    });

    info!("Stateful server is running on http://{}{}", local_addr, config.path);

    Ok(ServerHandle {
        local_addr,
        state,
        shutdown,
        server,
        reaper,
    })
}
