//! Admission control: decides which session a request belongs to before any
//! dispatch happens.

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::error::GatewayError;
use crate::jsonrpc::{is_initialization_request, RpcRequest};
use crate::session::{Session, SessionStore};

/// Request and response header carrying the session id
pub const SESSION_ID_HEADER: &str = "session-id";

/// Where a request was routed
pub struct Admission {
    pub session: Arc<Session>,
    /// The session was created for this request
    pub created: bool,
}

/// Session id sent by the client; blank or non-ASCII values count as absent
pub fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// 1. a known session id routes to that session, an unknown one is rejected;
/// 2. no id and an `initialize` request creates a session;
/// 3. anything else is a bad request.
pub async fn resolve(
    store: &SessionStore,
    session_id: Option<&str>,
    request: &RpcRequest,
) -> Result<Admission, GatewayError> {
    match session_id {
        Some(id) => store
            .get(id)
            .await
            .map(|session| Admission {
                session,
                created: false,
            })
            .ok_or_else(|| GatewayError::UnknownSession(id.to_string())),
        None if is_initialization_request(request) => Ok(Admission {
            session: store.create().await?,
            created: true,
        }),
        None => Err(GatewayError::BadRequest(
            "No valid session ID provided".to_string(),
        )),
    }
}
