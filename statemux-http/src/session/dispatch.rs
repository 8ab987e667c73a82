use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use statemux_core::{ToolContext, ToolOutput, ToolRegistry};
use tracing::{debug, info, warn};

use super::Session;
use crate::emitter;
use crate::error::GatewayError;
use crate::jsonrpc::{methods, RpcRequest, RpcResponse};

pub const PROTOCOL_VERSION: &str = "2025-03-26";

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "statemux".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Everything a session needs from the server to answer a request
#[derive(Clone)]
pub struct DispatchContext {
    pub tools: Arc<ToolRegistry>,
    pub server: ServerInfo,
}

impl DispatchContext {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            tools: Arc::new(tools),
            server: ServerInfo::default(),
        }
    }
}

/// How a request gets answered
pub enum Dispatch {
    /// One JSON envelope
    Reply(RpcResponse),
    /// Notification, nothing to send back
    Accepted,
    /// Streamed envelopes, pulled by the response body. Dropping it cancels the invocation.
    Stream(BoxStream<'static, RpcResponse>),
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reply(resp) => f.debug_tuple("Reply").field(resp).finish(),
            Self::Accepted => f.write_str("Accepted"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Request id as plain text for tools and logs; string ids lose their JSON quotes
fn display_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledParams {
    request_id: Value,
    #[serde(default)]
    reason: Option<String>,
}

impl Session {
    pub async fn dispatch(
        self: &Arc<Self>,
        http_request_id: &str,
        request: RpcRequest,
        ctx: &DispatchContext,
    ) -> Result<Dispatch, GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::UnknownSession(self.id().to_string()));
        }
        self.touch();

        if request.is_notification() {
            self.notify(http_request_id, &request);
            return Ok(Dispatch::Accepted);
        }

        let id = request.id_or_null();
        let result = match request.method.as_str() {
            methods::INITIALIZE => self.initialize(&request, ctx),
            methods::PING => json!({}),
            methods::SERVER_INFO => json!({
                "name": ctx.server.name,
                "version": ctx.server.version,
                "sessionId": self.id(),
                "createdAt": self.created_at().to_rfc3339(),
            }),
            methods::TOOLS_LIST => json!({ "tools": ctx.tools.list() }),
            methods::TOOLS_CALL => return self.call_tool(http_request_id, request, ctx).await,
            other => return Err(GatewayError::MethodNotFound(other.to_string())),
        };

        Ok(Dispatch::Reply(RpcResponse::success(id, result)))
    }

    fn initialize(&self, request: &RpcRequest, ctx: &DispatchContext) -> Value {
        let params = request.params_or_empty();
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION)
            .to_string();

        self.set_client_info(json!({
            "protocolVersion": protocol_version,
            "clientInfo": params.get("clientInfo").cloned().unwrap_or(Value::Null),
        }));

        json!({
            "protocolVersion": protocol_version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": ctx.server,
        })
    }

    fn notify(&self, http_request_id: &str, request: &RpcRequest) {
        match request.method.as_str() {
            methods::CANCELLED => {
                match serde_json::from_value::<CancelledParams>(request.params_or_empty()) {
                    Ok(params) => {
                        let hit = self.cancel_request(&params.request_id);
                        info!(
                            "[{}] - [{}] Cancel request {} ({} in flight, reason: {})",
                            http_request_id,
                            self.id(),
                            display_id(&params.request_id),
                            hit,
                            params.reason.as_deref().unwrap_or("none")
                        );
                    }
                    Err(e) => warn!("[{}] - [{}] Bad cancel notification: {}", http_request_id, self.id(), e),
                }
            }
            methods::INITIALIZED => debug!("[{}] - [{}] Client initialized", http_request_id, self.id()),
            other => debug!("[{}] - [{}] Ignoring notification {}", http_request_id, self.id(), other),
        }
    }

    async fn call_tool(
        self: &Arc<Self>,
        http_request_id: &str,
        request: RpcRequest,
        ctx: &DispatchContext,
    ) -> Result<Dispatch, GatewayError> {
        let id = request.id_or_null();
        let params: CallToolParams = serde_json::from_value(request.params_or_empty())
            .map_err(|e| GatewayError::InvalidArguments(format!("invalid tools/call params: {}", e)))?;

        let invocation = self.begin_invocation(id.clone())?;
        let tool_ctx = ToolContext::new(display_id(&id), invocation.token());
        let call = ctx.tools.prepare(&params.name, params.arguments, tool_ctx)?;
        info!("[{}] - [{}] TOOL {}", http_request_id, self.id(), params.name);

        let output = tokio::select! {
            biased;
            _ = invocation.cancelled() => Err(GatewayError::Cancelled),
            output = call => output.map_err(GatewayError::from),
        };
        let output = output.inspect_err(|e| {
            info!("[{}] - [{}] TOOL {} ✗ {}", http_request_id, self.id(), params.name, e);
        })?;

        match output {
            ToolOutput::Single(content) => {
                info!("[{}] - [{}] TOOL {} ✓", http_request_id, self.id(), params.name);
                Ok(Dispatch::Reply(emitter::single(id, &content)?))
            }
            ToolOutput::Stream(stream) => {
                let label = format!("[{}] - [{}] TOOL {}", http_request_id, self.id(), params.name);
                let token = invocation.token();

                let frames = emitter::emit_stream(id, stream, token, move |outcome| {
                    info!("{} {}", label, outcome);
                    drop(invocation);
                });

                Ok(Dispatch::Stream(frames))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use schemars::JsonSchema;
    use statemux_core::{PartialStream, Tool, ToolArgs, ToolContent, ToolError};
    use std::time::Duration;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct NoArgs {}

    impl ToolArgs for NoArgs {}

    struct Fails;

    #[async_trait]
    impl Tool for Fails {
        type Args = NoArgs;

        fn name(&self) -> &'static str {
            "fails"
        }

        fn description(&self) -> &'static str {
            "Always fails"
        }

        async fn execute(&self, _args: NoArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
            Err(ToolError::Execution("upstream unavailable".to_string()))
        }
    }

    struct Hangs;

    #[async_trait]
    impl Tool for Hangs {
        type Args = NoArgs;

        fn name(&self) -> &'static str {
            "hangs"
        }

        fn description(&self) -> &'static str {
            "Never finishes"
        }

        async fn execute(&self, _args: NoArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
            futures::future::pending().await
        }
    }

    struct Counts;

    #[async_trait]
    impl Tool for Counts {
        type Args = NoArgs;

        fn name(&self) -> &'static str {
            "counts"
        }

        fn description(&self) -> &'static str {
            "Streams 1, 1 2, 1 2 3"
        }

        async fn execute(&self, _args: NoArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Stream(PartialStream::from_snapshots(vec![
                ToolContent::text("1"),
                ToolContent::text("1 2"),
                ToolContent::text("1 2 3"),
            ])))
        }
    }

    fn ctx() -> DispatchContext {
        DispatchContext::new(ToolRegistry::new().with(Fails).with(Hangs).with(Counts))
    }

    fn session() -> Arc<Session> {
        Arc::new(Session::new("s-test".to_string()))
    }

    fn call(name: &str, id: i64) -> RpcRequest {
        RpcRequest::new(methods::TOOLS_CALL, Some(json!({ "name": name })), Some(json!(id)))
    }

    fn reply(dispatch: Dispatch) -> RpcResponse {
        match dispatch {
            Dispatch::Reply(resp) => resp,
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn initialize_records_client_and_advertises_tools() {
        let session = session();
        let request = RpcRequest::new(
            methods::INITIALIZE,
            Some(json!({"protocolVersion": "2024-11-05", "clientInfo": {"name": "cli"}})),
            Some(json!(0)),
        );
        let resp = reply(session.dispatch("h", request, &ctx()).await.unwrap());
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "statemux");
        assert!(result["capabilities"]["tools"].is_object());
        assert_eq!(session.client_info().unwrap()["clientInfo"]["name"], "cli");
    }

    #[tokio::test]
    async fn tools_list_and_unknown_method() {
        let session = session();
        let resp = reply(
            session
                .dispatch("h", RpcRequest::new(methods::TOOLS_LIST, None, Some(json!(1))), &ctx())
                .await
                .unwrap(),
        );
        assert_eq!(resp.result.unwrap()["tools"].as_array().unwrap().len(), 3);

        let err = session
            .dispatch("h", RpcRequest::new("resources/list", None, Some(json!(2))), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::MethodNotFound("resources/list".to_string()));
    }

    #[tokio::test]
    async fn notifications_are_accepted() {
        let session = session();
        let note = RpcRequest::new(methods::INITIALIZED, None, None);
        assert!(matches!(session.dispatch("h", note, &ctx()).await.unwrap(), Dispatch::Accepted));
    }

    #[tokio::test]
    async fn tool_failure_keeps_session_alive() {
        let session = session();
        let err = session.dispatch("h", call("fails", 1), &ctx()).await.unwrap_err();
        assert_eq!(err, GatewayError::ToolExecution("upstream unavailable".to_string()));
        assert!(!session.is_closed());
        assert_eq!(session.pending_count(), 0);

        let err = session.dispatch("h", call("missing", 2), &ctx()).await.unwrap_err();
        assert_eq!(err, GatewayError::UnknownTool("missing".to_string()));
    }

    #[tokio::test]
    async fn streamed_call_returns_frames_in_order() {
        let session = session();
        let mut frames = match session.dispatch("h", call("counts", 5), &ctx()).await.unwrap() {
            Dispatch::Stream(frames) => frames,
            other => panic!("expected a stream, got {:?}", other),
        };
        assert_eq!(session.pending_count(), 1);

        let mut texts = Vec::new();
        while let Some(frame) = frames.next().await {
            assert_eq!(frame.id, json!(5));
            texts.push(frame.result.unwrap()["content"][0]["text"].as_str().unwrap().to_string());
        }
        assert_eq!(texts, vec!["1", "1 2", "1 2 3"]);

        drop(frames);
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn requests_without_id_are_answered_with_null_id() {
        let session = session();
        let anonymous = RpcRequest {
            jsonrpc: None,
            method: methods::TOOLS_CALL.to_string(),
            params: Some(json!({"name": "unknown_tool"})),
            id: None,
        };
        let err = session.dispatch("h", anonymous, &ctx()).await.unwrap_err();
        assert_eq!(err, GatewayError::UnknownTool("unknown_tool".to_string()));

        let resp = reply(
            session
                .dispatch("h", RpcRequest::new(methods::PING, None, None), &ctx())
                .await
                .unwrap(),
        );
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.result, Some(json!({})));
    }

    #[test]
    fn string_ids_render_without_quotes() {
        assert_eq!(display_id(&json!("abc")), "abc");
        assert_eq!(display_id(&json!(42)), "42");
        assert_eq!(display_id(&Value::Null), "null");
    }

    #[tokio::test]
    async fn cancel_notification_aborts_single_shot_call() {
        let session = session();
        let ctx = ctx();

        let running = {
            let session = session.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { session.dispatch("h", call("hangs", 42), &ctx).await })
        };

        while session.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let cancel = RpcRequest::new(methods::CANCELLED, Some(json!({"requestId": 42})), None);
        session.dispatch("h", cancel, &ctx).await.unwrap();

        let err = running.await.unwrap().unwrap_err();
        assert_eq!(err, GatewayError::Cancelled);
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn closed_session_refuses_dispatch() {
        let session = session();
        session.close();
        let err = session
            .dispatch("h", RpcRequest::new(methods::PING, None, Some(json!(1))), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownSession(_)));
    }
}
