//! Change source abstraction
//!
//! The pipeline only needs commit history, tree diffs and blob reads.
//! [`GitRepository`] serves them from a git repository; tests use an
//! in-memory source.

pub mod git;

pub use git::GitRepository;

use crate::error::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A commit on the tracked reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRef {
    pub id: String,
    pub message: String,
    pub author: String,
    pub time: DateTime<Utc>,
}

impl CommitRef {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            author: String::new(),
            time: DateTime::<Utc>::default(),
        }
    }

    /// First line of the commit message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    Add,
    Modify,
    Delete,
    Other,
}

/// One changed path between two commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub path: String,
    pub action: DiffAction,
    /// Blob id on the new side; empty for deletes
    pub blob_id: String,
}

/// A file in a commit's full tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    pub path: String,
    pub blob_id: String,
    pub bytes: Vec<u8>,
}

/// Read access to version-controlled history
pub trait ChangeSource {
    /// Commits reachable from `reference` (or the configured branch), newest first
    fn list_commits(&self, reference: Option<&str>) -> AppResult<Vec<CommitRef>>;

    /// Tree diff `from` -> `to`
    fn diff(&self, from: &str, to: &str) -> AppResult<Vec<DiffEntry>>;

    fn read_blob(&self, commit: &str, path: &str) -> AppResult<Vec<u8>>;

    fn full_tree(&self, commit: &str) -> AppResult<Vec<TreeFile>>;
}
