//! Durable tracking records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate record for one applied bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Commit hash of the bundle
    pub tracking_id: String,
    pub message: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub applied_by: String,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub completed: bool,
    pub fast_forward: bool,
}

/// Outcome of one item within a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogItemEntry {
    pub tracking_id: String,
    pub file: String,
    pub object_type: String,
    pub object_name: String,
    pub identifier_hash: String,
    pub git_hash: String,
    pub executed: bool,
    pub success: bool,
    pub partial: bool,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

/// Tracking history, oldest first
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackingLog {
    entries: Vec<LogEntry>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl TrackingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: LogEntry) {
        self.index.insert(entry.tracking_id.clone(), self.entries.len());
        self.entries.push(entry);
    }

    /// The checkpoint: the most recently added entry
    pub fn last_processed(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn find(&self, tracking_id: &str) -> Option<&LogEntry> {
        self.index.get(tracking_id).map(|&i| &self.entries[i])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> LogEntry {
        LogEntry {
            tracking_id: id.to_string(),
            message: format!("commit {}", id),
            start: Utc::now(),
            end: Utc::now(),
            applied_by: "LOADER".to_string(),
            total: 1,
            success: 1,
            failed: 0,
            completed: true,
            fast_forward: false,
        }
    }

    #[test]
    fn test_empty_log_has_no_checkpoint() {
        let log = TrackingLog::new();
        assert!(log.is_empty());
        assert!(log.last_processed().is_none());
    }

    #[test]
    fn test_last_added_entry_is_checkpoint() {
        let mut log = TrackingLog::new();
        log.add(entry("c1"));
        log.add(entry("c2"));

        assert_eq!(log.len(), 2);
        assert_eq!(log.last_processed().map(|e| e.tracking_id.as_str()), Some("c2"));
        assert_eq!(log.find("c1").map(|e| e.message.as_str()), Some("commit c1"));
        assert!(log.find("c9").is_none());
    }
}
