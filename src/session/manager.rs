//! Directory of live sessions keyed by session id.
//!
//! Owns admission control (capacity with optional most-idle eviction) and
//! the TTL sweep. Sessions are closed outside the directory lock so a
//! close that wakes suspended callers never blocks directory traffic.

use std::collections::HashMap;
// std::sync::Mutex is correct here—lock is never held across .await points.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{CloseReason, Session};
use crate::error::ProxyError;

/// Redacted per-session metadata for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub state: &'static str,
    pub age_seconds: u64,
    pub idle_seconds: u64,
}

/// Tuning knobs for the directory, all durations per-call wall clock.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub handshake_budget: Duration,
    pub turn_budget: Duration,
    pub session_ttl: Duration,
    pub max_sessions: usize,
    pub evict_on_full: bool,
}

pub struct SessionManager {
    config: ManagerConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Look up or create the session for `id`.
    ///
    /// Atomic with respect to side assignment: two concurrent first
    /// arrivals observe the same session object and race for Side A under
    /// that session's own lock. A session that already closed (handshake
    /// timeout, TTL) is transparently replaced by a fresh one.
    pub fn get_or_create(&self, id: &str) -> Result<Arc<Session>, ProxyError> {
        let (session, evicted) = {
            let mut sessions = self.sessions.lock().expect("mutex poisoned");

            if let Some(session) = sessions.get(id) {
                if !session.is_closed() {
                    return Ok(Arc::clone(session));
                }
                sessions.remove(id);
            }

            let mut evicted = None;
            if sessions.len() >= self.config.max_sessions {
                if !self.config.evict_on_full {
                    return Err(ProxyError::Overloaded);
                }
                let candidate = sessions
                    .values()
                    .max_by_key(|s| s.idle_for())
                    .map(|s| s.id().to_string());
                match candidate {
                    Some(victim_id) => evicted = sessions.remove(&victim_id),
                    None => return Err(ProxyError::Overloaded),
                }
            }

            let session = Arc::new(Session::new(
                id,
                self.config.handshake_budget,
                self.config.turn_budget,
            ));
            sessions.insert(id.to_string(), Arc::clone(&session));
            (session, evicted)
        };

        // Close the victim after the directory lock is released; close
        // wakes suspended callers.
        if let Some(victim) = evicted {
            info!(session_id = %victim.id(), "evicted most-idle session at capacity");
            victim.close(CloseReason::Evicted);
        }
        Ok(session)
    }

    /// Read-only lookup.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("mutex poisoned")
            .get(id)
            .cloned()
    }

    /// Administrative close and removal.
    pub fn close(&self, id: &str, reason: CloseReason) -> bool {
        let removed = self.sessions.lock().expect("mutex poisoned").remove(id);
        match removed {
            Some(session) => {
                session.close(reason);
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().expect("mutex poisoned").len()
    }

    /// Redacted listing for admin/observability.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = {
            let map = self.sessions.lock().expect("mutex poisoned");
            map.values().cloned().collect()
        };
        sessions
            .iter()
            .map(|s| SessionInfo {
                id: s.id().to_string(),
                state: s.lifecycle().as_str(),
                age_seconds: s.age().as_secs(),
                idle_seconds: s.idle_for().as_secs(),
            })
            .collect()
    }

    /// Remove and close every session idle for at least the TTL.
    ///
    /// Returns the number of sessions swept. Closed-but-not-yet-replaced
    /// sessions are also dropped here.
    pub fn sweep_expired(&self) -> usize {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().expect("mutex poisoned");
            let expired_ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.is_closed() || s.is_idle_for(self.config.session_ttl))
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids
                .iter()
                .filter_map(|id| sessions.remove(id))
                .collect()
        };
        let count = expired.len();
        for session in expired {
            session.close(CloseReason::TtlExpired);
        }
        count
    }

    /// Spawn the periodic TTL sweep.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired();
                if removed > 0 {
                    debug!(removed, remaining = self.count(), "swept expired sessions");
                }
            }
        })
    }

    /// Close every session. Called at server shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().expect("mutex poisoned");
            sessions.drain().map(|(_, s)| s).collect()
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "closing all sessions");
        }
        for session in drained {
            session.close(CloseReason::Shutdown);
        }
    }
}
