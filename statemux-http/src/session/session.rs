use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::PendingInvocation;
use crate::error::GatewayError;

pub type SessionId = String;

struct PendingEntry {
    request_id: Value,
    cancel: CancellationToken,
}

/// Server-side state of one client.
///
/// The `channel` token stands for the session's open channel: every pending
/// invocation holds a child of it, so closing the session cancels them all.
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    channel: CancellationToken,
    closed: AtomicBool,
    client_info: Mutex<Option<Value>>,
    pending: Mutex<HashMap<u64, PendingEntry>>,
    next_invocation: AtomicU64,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            channel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            client_info: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_invocation: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Record activity on the session
    pub fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    pub fn client_info(&self) -> Option<Value> {
        lock(&self.client_info).clone()
    }

    pub(crate) fn set_client_info(&self, info: Value) {
        *lock(&self.client_info) = Some(info);
    }

    /// Close the channel and cancel every pending invocation.
    /// Returns `false` if the session was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.channel.cancel();
        debug!("[{}] session channel closed", self.id);
        true
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Register an in-flight request. The returned guard unregisters it on drop.
    pub fn begin_invocation(self: &Arc<Self>, request_id: Value) -> Result<PendingInvocation, GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::UnknownSession(self.id.clone()));
        }

        let key = self.next_invocation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.channel.child_token();
        lock(&self.pending).insert(
            key,
            PendingEntry {
                request_id: request_id.clone(),
                cancel: cancel.clone(),
            },
        );

        Ok(PendingInvocation::new(self.clone(), key, request_id, cancel))
    }

    pub(crate) fn finish_invocation(&self, key: u64) {
        lock(&self.pending).remove(&key);
    }

    /// Cancel in-flight invocations carrying `request_id`; returns how many were hit.
    /// Uncorrelated (`null` id) invocations cannot be targeted.
    pub fn cancel_request(&self, request_id: &Value) -> usize {
        if request_id.is_null() {
            return 0;
        }
        let pending = lock(&self.pending);
        let mut cancelled = 0;
        for entry in pending.values().filter(|e| &e.request_id == request_id) {
            entry.cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Arc<Session> {
        Arc::new(Session::new("s-1".to_string()))
    }

    #[test]
    fn invocations_are_tracked_until_dropped() {
        let session = session();
        let first = session.begin_invocation(json!(1)).unwrap();
        let second = session.begin_invocation(json!(2)).unwrap();
        assert_eq!(session.pending_count(), 2);

        drop(first);
        assert_eq!(session.pending_count(), 1);
        drop(second);
        assert_eq!(session.pending_count(), 0);
    }

    #[test]
    fn close_cancels_pending_and_refuses_new_work() {
        let session = session();
        let invocation = session.begin_invocation(json!(1)).unwrap();

        assert!(session.close());
        assert!(!session.close());
        assert!(session.is_closed());
        assert!(invocation.is_cancelled());

        let err = session.begin_invocation(json!(2)).err().unwrap();
        assert!(matches!(err, GatewayError::UnknownSession(_)));
    }

    #[test]
    fn cancel_request_targets_matching_id_only() {
        let session = session();
        let a = session.begin_invocation(json!("a")).unwrap();
        let b = session.begin_invocation(json!("b")).unwrap();

        assert_eq!(session.cancel_request(&json!("a")), 1);
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert_eq!(session.cancel_request(&json!("zzz")), 0);

        let anonymous = session.begin_invocation(Value::Null).unwrap();
        assert_eq!(session.cancel_request(&Value::Null), 0);
        assert!(!anonymous.is_cancelled());
    }

    #[test]
    fn touch_resets_idle_clock() {
        let session = session();
        std::thread::sleep(Duration::from_millis(5));
        let before = session.idle_for();
        assert!(before >= Duration::from_millis(5));
        session.touch();
        assert!(session.idle_for() < before);
    }
}
