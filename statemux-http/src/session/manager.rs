use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Session, SessionId};
use crate::error::GatewayError;

/// Configuration for the session store
#[derive(Clone, Debug)]
pub struct SessionStoreConfig {
    /// Maximum number of concurrent sessions (None = unlimited)
    pub max_sessions: Option<usize>,
    /// Sessions idle for longer than this are evicted (None = never)
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            max_sessions: Some(100),
            idle_timeout: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// Session store - owns every live session by ID
/// Handles creation, lookup and eviction; each operation is atomic under one lock
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    max_sessions: Option<usize>,
    idle_timeout: Option<Duration>,
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions: config.max_sessions,
            idle_timeout: config.idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Register a session under a fresh random (v4) UUID.
    /// Uniqueness comes from the 122 bits of entropy, not from the lock.
    pub async fn create(&self) -> Result<Arc<Session>, GatewayError> {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone()));

        let mut sessions = self.sessions.lock().await;
        if let Some(max) = self.max_sessions {
            if sessions.len() >= max {
                return Err(GatewayError::Unavailable(format!(
                    "Maximum number of sessions reached: {}",
                    max
                )));
            }
        }
        sessions.insert(id.clone(), session.clone());
        drop(sessions);

        info!("[{}] Session created", id);
        Ok(session)
    }

    /// Pure lookup, never creates
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Remove and close a session. Evicting an absent id is a no-op.
    pub async fn evict(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.lock().await.remove(id)?;
        session.close();
        info!("[{}] Session evicted", id);
        Some(session)
    }

    /// Explicit termination requested by the client
    pub async fn terminate(&self, id: &str) -> Result<(), GatewayError> {
        self.evict(id)
            .await
            .map(|_| ())
            .ok_or_else(|| GatewayError::UnknownSession(id.to_string()))
    }

    /// Evict sessions with nothing in flight that have been idle longer than `max_idle`
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            let ids: Vec<SessionId> = sessions
                .values()
                .filter(|s| s.pending_count() == 0 && s.idle_for() > max_idle)
                .map(|s| s.id().to_string())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            session.close();
            info!("[{}] Session expired after {:?} idle", session.id(), max_idle);
        }
        expired.len()
    }

    /// Close and evict every session (server shutdown)
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
            debug!("[{}] Session closed on shutdown", session.id());
        }
        drained.len()
    }

    /// Get the number of live sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Periodically evict idle sessions until `shutdown` fires.
/// Returns `None` when the store has no idle timeout.
pub fn start_reaper(
    store: Arc<SessionStore>,
    every: Duration,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let max_idle = store.idle_timeout()?;

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = store.evict_idle(max_idle).await;
                    if evicted > 0 {
                        debug!("reaper evicted {} idle session(s)", evicted);
                    }
                }
            }
        }
    }))
}
