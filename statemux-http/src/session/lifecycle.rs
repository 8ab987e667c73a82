use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use super::Session;

/// One in-flight request on a session.
///
/// Lives as long as the request is being answered: dropped after the terminal
/// response is emitted, or after the invocation is cancelled. Dropping it
/// unregisters the request from its session.
pub struct PendingInvocation {
    session: Arc<Session>,
    key: u64,
    request_id: Value,
    cancel: CancellationToken,
}

impl PendingInvocation {
    pub(super) fn new(session: Arc<Session>, key: u64, request_id: Value, cancel: CancellationToken) -> Self {
        Self {
            session,
            key,
            request_id,
            cancel,
        }
    }

    pub fn request_id(&self) -> &Value {
        &self.request_id
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

impl Drop for PendingInvocation {
    fn drop(&mut self) {
        self.session.finish_invocation(self.key);
        debug!(
            "[{}] request {} released (cancelled: {})",
            self.session.id(),
            self.request_id,
            self.cancel.is_cancelled()
        );
    }
}
