//! Session registry
//!
//! The only shared mutable state in the monitoring layer. Sessions are
//! inserted atomically if absent and removed-and-returned on stop, so the
//! caller that removes a session becomes the sole owner of its handles.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Active,
}

/// A registered monitoring session and the resources it owns
#[derive(Debug)]
pub struct Session<H> {
    pub session_id: String,
    pub exam_id: String,
    pub status: SessionStatus,
    pub handles: H,
}

impl<H> Session<H> {
    pub fn active(session_id: &str, exam_id: &str, handles: H) -> Self {
        Self {
            session_id: session_id.to_string(),
            exam_id: exam_id.to_string(),
            status: SessionStatus::Active,
            handles,
        }
    }
}

/// Concurrent map of session id to session
#[derive(Debug)]
pub struct SessionRegistry<H> {
    sessions: DashMap<String, Session<H>>,
}

impl<H> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> SessionRegistry<H> {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session unless one with the same id exists.
    ///
    /// `make` only runs when the slot is free, while the slot is held, so
    /// it must not touch the registry itself. Returns whether it ran.
    pub fn insert_if_absent(&self, session_id: &str, make: impl FnOnce() -> Session<H>) -> bool {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(make());
                true
            }
        }
    }

    /// Remove a session, handing its resources to the caller
    pub fn remove(&self, session_id: &str) -> Option<Session<H>> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// `Idle` for unknown sessions
    pub fn status(&self, session_id: &str) -> SessionStatus {
        self.sessions
            .get(session_id)
            .map_or(SessionStatus::Idle, |s| s.status)
    }

    /// Run `f` against a session's handles without removing it
    pub fn with_handles<R>(&self, session_id: &str, f: impl FnOnce(&H) -> R) -> Option<R> {
        self.sessions.get(session_id).map(|s| f(&s.handles))
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_if_absent_runs_once() {
        let registry = SessionRegistry::new();
        let mut built = 0;

        assert!(registry.insert_if_absent("s1", || {
            built += 1;
            Session::active("s1", "exam", 7u32)
        }));
        assert!(!registry.insert_if_absent("s1", || {
            built += 1;
            Session::active("s1", "exam", 8u32)
        }));

        assert_eq!(built, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.with_handles("s1", |h| *h), Some(7));
        assert_eq!(registry.status("s1"), SessionStatus::Active);
    }

    #[test]
    fn test_remove_returns_session_once() {
        let registry = SessionRegistry::new();
        registry.insert_if_absent("s1", || Session::active("s1", "exam", ()));

        let removed = registry.remove("s1").unwrap();
        assert_eq!(removed.session_id, "s1");
        assert!(registry.remove("s1").is_none());
        assert!(!registry.contains("s1"));
        assert_eq!(registry.status("s1"), SessionStatus::Idle);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_starts_register_one_session() {
        let registry = Arc::new(SessionRegistry::new());
        let winners: usize = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.insert_if_absent("shared", || Session::active("shared", "exam", i)))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(registry.session_ids(), vec!["shared".to_string()]);
    }
}
