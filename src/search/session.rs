use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

pub type SessionId = u64;

#[derive(Clone, Debug)]
pub struct SearchSession {
    pub id: SessionId,
    pub rank_profile: String,
    pub created: Instant,
}

/// Search sessions shared by every sub-database of a document database
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<SessionId, SearchSession>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, rank_profile: &str) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions.insert(
            id,
            SearchSession {
                id,
                rank_profile: rank_profile.to_string(),
                created: Instant::now(),
            },
        );
        id
    }

    pub fn get(&self, id: SessionId) -> Option<SearchSession> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    pub fn close(&self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions older than `max_age`; returns how many were dropped
    pub fn prune_timed_out(&self, max_age: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.created.elapsed() <= max_age);
        let pruned = before.saturating_sub(self.sessions.len());
        if pruned > 0 {
            debug!(pruned, "Pruned timed out search sessions");
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let sessions = SessionManager::new();
        let a = sessions.create("default");
        let b = sessions.create("fresh");
        assert_ne!(a, b);
        assert_eq!(sessions.get(b).unwrap().rank_profile, "fresh");
        assert!(sessions.close(a));
        assert!(!sessions.close(a));
        assert_eq!(sessions.num_sessions(), 1);

        assert_eq!(sessions.prune_timed_out(Duration::from_secs(3600)), 0);
        assert_eq!(sessions.prune_timed_out(Duration::ZERO), 1);
    }
}
