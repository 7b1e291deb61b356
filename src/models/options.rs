//! Run-mode options

use crate::error::{AppError, AppResult};
use crate::source::CommitRef;
use serde::{Deserialize, Serialize};

/// Shortest commit prefix accepted as an explicit target
const MIN_COMMIT_PREFIX: usize = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFlags {
    pub skip_validation: bool,
    /// Rebuild from the full tree of one commit instead of diffing history
    pub fast_forward: bool,
    pub single_file_change: bool,
    pub use_local_repository: bool,
}

/// Externally supplied file for single-file runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub flags: RunFlags,
    pub commit_id: Option<String>,
    pub branch_override: Option<String>,
    pub file: Option<FileInfo>,
}

impl RunOptions {
    /// Resolve the commit a run works towards; `history` is newest first
    pub fn evaluate_target_commit<'a>(&self, history: &'a [CommitRef]) -> AppResult<&'a CommitRef> {
        let newest = history
            .first()
            .ok_or_else(|| AppError::TargetCommitNotFound("empty history".to_string()))?;

        let Some(wanted) = self.commit_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(newest);
        };

        if let Some(exact) = history.iter().find(|c| c.id == wanted) {
            return Ok(exact);
        }

        if wanted.len() >= MIN_COMMIT_PREFIX {
            let mut matches = history.iter().filter(|c| c.id.starts_with(wanted));
            if let (Some(found), None) = (matches.next(), matches.next()) {
                return Ok(found);
            }
        }

        Err(AppError::TargetCommitNotFound(wanted.to_string()))
    }
}
