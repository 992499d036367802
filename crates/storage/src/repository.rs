//! Activity repository

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use monitoring::{ActivityLog, SinkError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::StorageError;

/// A logged suspicious activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: i64,
    pub session_id: String,
    pub exam_id: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub evidence_path: Option<String>,
}

struct Records {
    entries: VecDeque<ActivityRecord>,
    next_id: i64,
}

/// In-memory activity store with a retention cap
pub struct ActivityRepository {
    records: Mutex<Records>,
    max_records: usize,
}

impl ActivityRepository {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Keep at most `max_records`, dropping the oldest first
    pub fn with_capacity(max_records: usize) -> Self {
        info!("Creating in-memory activity repository (max {} records)", max_records);
        Self {
            records: Mutex::new(Records {
                entries: VecDeque::new(),
                next_id: 1,
            }),
            max_records: max_records.max(1),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Records>, StorageError> {
        self.records
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }

    /// Insert a record, returning its id
    pub fn insert(
        &self,
        session_id: &str,
        exam_id: &str,
        description: &str,
        evidence_path: Option<&str>,
    ) -> Result<i64, StorageError> {
        let mut records = self.lock()?;
        let id = records.next_id;
        records.next_id += 1;

        while records.entries.len() >= self.max_records {
            records.entries.pop_front();
        }

        records.entries.push_back(ActivityRecord {
            id,
            session_id: session_id.to_string(),
            exam_id: exam_id.to_string(),
            description: description.to_string(),
            timestamp: Utc::now(),
            evidence_path: evidence_path.map(str::to_string),
        });
        debug!("Inserted activity {} for session {}", id, session_id);
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<ActivityRecord, StorageError> {
        self.lock()?
            .entries
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    /// Records matching the given session and/or exam, oldest first
    pub fn find(&self, session_id: Option<&str>, exam_id: Option<&str>) -> Result<Vec<ActivityRecord>, StorageError> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .filter(|r| session_id.map_or(true, |s| r.session_id == s))
            .filter(|r| exam_id.map_or(true, |e| r.exam_id == e))
            .cloned()
            .collect())
    }

    pub fn count(&self) -> usize {
        self.records.lock().map(|r| r.entries.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.entries.clear();
        }
    }
}

impl Default for ActivityRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityLog for ActivityRepository {
    fn record(&self, session_id: &str, exam_id: &str, description: &str, evidence: Option<&str>) -> Result<(), SinkError> {
        self.insert(session_id, exam_id, description, evidence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> ActivityRepository {
        let repo = ActivityRepository::new();
        repo.insert("s1", "math", "No face detected - student may be absent", None).unwrap();
        repo.insert("s2", "math", "Multiple faces detected - potential collaboration", Some("evidence/a.jpg")).unwrap();
        repo.insert("s1", "physics", "No eyes detected - student may be looking away", None).unwrap();
        repo
    }

    #[test]
    fn test_insert_and_get() {
        let repo = seeded();
        let record = repo.get(2).unwrap();
        assert_eq!(record.session_id, "s2");
        assert_eq!(record.evidence_path.as_deref(), Some("evidence/a.jpg"));
        assert!(matches!(repo.get(99), Err(StorageError::NotFound)));
    }

    #[test]
    fn test_find_filters() {
        let repo = seeded();
        assert_eq!(repo.find(None, None).unwrap().len(), 3);
        assert_eq!(repo.find(Some("s1"), None).unwrap().len(), 2);
        assert_eq!(repo.find(None, Some("math")).unwrap().len(), 2);

        let both = repo.find(Some("s1"), Some("physics")).unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].id, 3);
        assert!(repo.find(Some("s3"), None).unwrap().is_empty());
    }

    #[test]
    fn test_retention_limit() {
        let repo = ActivityRepository::with_capacity(5);
        for i in 0..10 {
            repo.insert(&format!("s{}", i), "exam", "No face detected", None).unwrap();
        }
        assert_eq!(repo.count(), 5);
        // ids keep increasing after eviction
        assert_eq!(repo.find(None, None).unwrap()[0].id, 6);
    }

    #[test]
    fn test_records_through_activity_log() {
        let repo = ActivityRepository::new();
        let log: &dyn ActivityLog = &repo;
        log.record("s1", "e1", "Face not centered - student may be looking to the side", Some("x.jpg"))
            .unwrap();
        assert_eq!(repo.count(), 1);

        repo.clear();
        assert_eq!(repo.count(), 0);
    }
}
