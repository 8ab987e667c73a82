use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::Value;
use statemux_core::ToolError;
use tracing::error;

use crate::jsonrpc::{
    RpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    SERVER_ERROR, TOOL_EXECUTION_ERROR,
};

/// Every way a request can be rejected.
///
/// Routing errors (`UnknownSession`, `BadRequest`) are raised before dispatch;
/// the rest come out of dispatch and never close the session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),
    #[error("Bad Request: Unknown session ID")]
    UnknownSession(String),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Tool {0} not found")]
    UnknownTool(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),
    #[error("Request cancelled")]
    Cancelled,
    /// Detail is logged, never sent to the client
    #[error("Internal server error")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => PARSE_ERROR,
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::UnknownSession(_) | Self::BadRequest(_) | Self::Unavailable(_) | Self::Cancelled => {
                SERVER_ERROR
            }
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::UnknownTool(_) | Self::InvalidArguments(_) => INVALID_PARAMS,
            Self::ToolExecution(_) => TOOL_EXECUTION_ERROR,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// JSON-RPC level failures travel on a 200; transport level ones don't
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Parse(_) | Self::InvalidRequest(_) | Self::UnknownSession(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MethodNotFound(_)
            | Self::UnknownTool(_)
            | Self::InvalidArguments(_)
            | Self::ToolExecution(_)
            | Self::Cancelled => StatusCode::OK,
        }
    }

    pub fn to_envelope(&self, id: Value) -> RpcResponse {
        RpcResponse::error(id, self.code(), self.to_string())
    }
}

impl From<ToolError> for GatewayError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::UnknownTool(name) => Self::UnknownTool(name),
            ToolError::InvalidArguments(msg) => Self::InvalidArguments(msg),
            ToolError::Execution(msg) => Self::ToolExecution(msg),
        }
    }
}

/// A [`GatewayError`] bound to the id of the request that caused it
#[derive(Debug)]
pub struct ErrorResponse {
    pub error: GatewayError,
    pub id: Value,
}

impl ErrorResponse {
    pub fn new(error: GatewayError, id: Value) -> Self {
        Self { error, id }
    }
}

impl From<GatewayError> for ErrorResponse {
    fn from(error: GatewayError) -> Self {
        Self::new(error, Value::Null)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        if let GatewayError::Internal(detail) = &self.error {
            error!("internal error: {}", detail);
        }
        (self.error.status(), Json(self.error.to_envelope(self.id))).into_response()
    }
}

/// JSON body extractor that rejects with a JSON-RPC envelope instead of
/// axum's plain-text rejection. Does not insist on a `Content-Type`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ErrorResponse;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| GatewayError::BadRequest(e.body_text()))?;

        serde_json::from_slice(&bytes).map(ApiJson).map_err(|e| {
            let err = if e.is_data() {
                GatewayError::InvalidRequest(e.to_string())
            } else {
                GatewayError::Parse(e.to_string())
            };
            err.into()
        })
    }
}
