//! Per-client pipeline sessions
//!
//! Each client session owns one [`PipelineRunner`] (its own progress and
//! last report), forked from a shared prototype. Starting a run supersedes
//! only the runs of the same session.
//!
//! Sessions idle for longer than the configured timeout are evicted when a
//! new session is created, unless a run still holds the session's runner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::services::pipeline::PipelineRunner;

/// Longest accepted session id
pub const MAX_SESSION_ID_LEN: usize = 64;

/// `[A-Za-z0-9_-]{1,64}`
pub fn is_valid_session_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_SESSION_ID_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

struct SessionSlot {
    runner: Arc<PipelineRunner>,
    last_seen: Instant,
}

impl SessionSlot {
    /// Idle long enough and not referenced by a run or request
    fn is_evictable(&self, idle_timeout: Duration) -> bool {
        self.last_seen.elapsed() >= idle_timeout && Arc::strong_count(&self.runner) == 1
    }
}

pub struct PipelineSessions {
    prototype: Arc<PipelineRunner>,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl PipelineSessions {
    pub fn new(prototype: Arc<PipelineRunner>, idle_timeout: Duration) -> Self {
        Self {
            prototype,
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Runner whose shared services (resolver, fetcher) serve every session
    pub fn prototype(&self) -> &Arc<PipelineRunner> {
        &self.prototype
    }

    /// The session's runner, created on first use
    pub async fn get_or_create(&self, session_id: &str) -> Arc<PipelineRunner> {
        let mut sessions = self.sessions.lock().await;

        if let Some(slot) = sessions.get_mut(session_id) {
            slot.last_seen = Instant::now();
            return Arc::clone(&slot.runner);
        }

        let evicted = Self::sweep(&mut sessions, self.idle_timeout);
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle pipeline sessions");
        }

        debug!(session_id = %session_id, "Creating pipeline session");
        let runner = Arc::new(self.prototype.fork(session_id));
        sessions.insert(
            session_id.to_string(),
            SessionSlot {
                runner: Arc::clone(&runner),
                last_seen: Instant::now(),
            },
        );
        runner
    }

    /// The session's runner if the session exists
    pub async fn get(&self, session_id: &str) -> Option<Arc<PipelineRunner>> {
        let mut sessions = self.sessions.lock().await;
        sessions.get_mut(session_id).map(|slot| {
            slot.last_seen = Instant::now();
            Arc::clone(&slot.runner)
        })
    }

    /// Drop idle sessions now; returns how many were removed
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        Self::sweep(&mut sessions, self.idle_timeout)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    fn sweep(sessions: &mut HashMap<String, SessionSlot>, idle_timeout: Duration) -> usize {
        let before = sessions.len();
        sessions.retain(|_, slot| !slot.is_evictable(idle_timeout));
        before - sessions.len()
    }
}
