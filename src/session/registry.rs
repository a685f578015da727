//! # Session Registry
//!
//! Tracks the live sessions currently hosted by this backend: their state,
//! who they are speaking as, and when they were created. Enforces the
//! concurrent-session limit and sweeps finished records.
//!
//! The registry holds a shared handle to each session's state, so a record's
//! status always reflects the controller's state machine without any
//! cross-component mutation.

use crate::session::controller::SessionState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry view of one live session.
#[derive(Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub persona_name: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    /// Shared with the session controller; reflects every transition
    status: Arc<RwLock<SessionState>>,
}

impl SessionRecord {
    pub fn new(
        session_id: String,
        persona_name: String,
        language: String,
        status: Arc<RwLock<SessionState>>,
    ) -> Self {
        Self {
            session_id,
            persona_name,
            language,
            created_at: Utc::now(),
            status,
        }
    }

    pub fn status(&self) -> SessionState {
        *self.status.read().unwrap()
    }

    /// A session that has returned to Idle or died in Errored holds no
    /// devices and is eligible for cleanup.
    pub fn is_finished(&self) -> bool {
        matches!(self.status(), SessionState::Idle | SessionState::Errored)
    }
}

/// Manages the set of live sessions.
///
/// ## Thread Safety:
/// RwLock over the record map: status reads are frequent (health endpoint,
/// dashboard), registration and removal are rare.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    max_concurrent: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent,
        }
    }

    /// Register a session, enforcing the concurrency limit.
    ///
    /// Finished records do not count against the limit; they are swept here
    /// rather than left to block new sessions.
    pub fn register(&self, record: SessionRecord) -> Result<(), String> {
        let mut sessions = self.sessions.write().unwrap();
        sessions.retain(|_, existing| !existing.is_finished());

        if sessions.len() >= self.max_concurrent {
            return Err(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_concurrent
            ));
        }

        if sessions.contains_key(&record.session_id) {
            return Err(format!("Session '{}' already registered", record.session_id));
        }

        sessions.insert(record.session_id.clone(), record);
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    /// Number of registered sessions that are not finished.
    pub fn active_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|r| !r.is_finished())
            .count()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Remove finished records and anything older than `max_age_seconds`.
    ///
    /// Returns how many records were removed.
    pub fn cleanup(&self, max_age_seconds: u64) -> usize {
        let mut sessions = self.sessions.write().unwrap();
        let now = Utc::now();
        let before = sessions.len();

        sessions.retain(|_, record| {
            if record.is_finished() {
                return false;
            }
            let age = now.signed_duration_since(record.created_at).num_seconds();
            age <= max_age_seconds as i64
        });

        before - sessions.len()
    }

    /// Snapshot of all records for the health/metrics surface.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .map(|record| SessionSummary {
                session_id: record.session_id.clone(),
                persona_name: record.persona_name.clone(),
                language: record.language.clone(),
                status: record.status().as_str(),
                created_at: record.created_at,
            })
            .collect()
    }
}

/// Immutable snapshot of one session record.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub persona_name: String,
    pub language: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, state: SessionState) -> SessionRecord {
        SessionRecord::new(
            id.to_string(),
            "Zephyr".to_string(),
            "en-US".to_string(),
            Arc::new(RwLock::new(state)),
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SessionRegistry::new(2);
        registry.register(record("a", SessionState::Streaming)).unwrap();

        let found = registry.get("a").unwrap();
        assert_eq!(found.persona_name, "Zephyr");
        assert_eq!(found.status(), SessionState::Streaming);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_concurrency_limit() {
        let registry = SessionRegistry::new(1);
        registry.register(record("a", SessionState::Streaming)).unwrap();
        assert!(registry.register(record("b", SessionState::Streaming)).is_err());

        // A finished session no longer blocks registration
        registry.remove("a");
        registry.register(record("b", SessionState::Streaming)).unwrap();
    }

    #[test]
    fn test_finished_records_are_swept_on_register() {
        let registry = SessionRegistry::new(1);
        registry.register(record("a", SessionState::Errored)).unwrap();
        // "a" is finished, so "b" fits despite the limit of 1
        registry.register(record("b", SessionState::Streaming)).unwrap();
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = SessionRegistry::new(4);
        registry.register(record("a", SessionState::Streaming)).unwrap();
        assert!(registry.register(record("a", SessionState::Streaming)).is_err());
    }

    #[test]
    fn test_status_follows_shared_handle() {
        let status = Arc::new(RwLock::new(SessionState::Streaming));
        let registry = SessionRegistry::new(2);
        registry
            .register(SessionRecord::new(
                "a".to_string(),
                "Kore".to_string(),
                "ja-JP".to_string(),
                Arc::clone(&status),
            ))
            .unwrap();

        *status.write().unwrap() = SessionState::Errored;
        assert_eq!(registry.get("a").unwrap().status(), SessionState::Errored);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_cleanup_removes_finished() {
        let registry = SessionRegistry::new(4);
        registry.register(record("a", SessionState::Idle)).unwrap();
        registry.register(record("b", SessionState::Streaming)).unwrap();

        let removed = registry.cleanup(3600);
        assert_eq!(removed, 1);
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_some());
    }
}
