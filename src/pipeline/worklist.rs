//! Worklist builder
//!
//! Works out which commits have not been applied yet.

use crate::error::{AppError, AppResult};
use crate::models::RunOptions;
use crate::source::CommitRef;
use tracing::debug;

/// Commits to process, newest first.
///
/// `history` is newest first. In fast-forward mode the worklist is the
/// target commit alone. Otherwise it holds every commit from the target
/// (inclusive) down to the checkpoint (exclusive); an empty result means
/// the checkpoint already is the target.
pub fn build_worklist(
    history: &[CommitRef],
    options: &RunOptions,
    last_processed: Option<&str>,
) -> AppResult<Vec<CommitRef>> {
    let target = options.evaluate_target_commit(history)?;

    if options.flags.fast_forward {
        debug!("Fast-forward to {}", target.id);
        return Ok(vec![target.clone()]);
    }

    let last = last_processed.ok_or(AppError::NoLastCommitFound)?;
    if last == target.id {
        debug!("Checkpoint {} is already the target", last);
        return Ok(Vec::new());
    }

    let worklist: Vec<CommitRef> = history
        .iter()
        .skip_while(|c| c.id != target.id)
        .take_while(|c| c.id != last)
        .cloned()
        .collect();

    debug!(
        "Worklist holds {} commits between {} and {}",
        worklist.len(),
        last,
        target.id
    );
    Ok(worklist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunFlags;
    use pretty_assertions::assert_eq;

    fn history() -> Vec<CommitRef> {
        ["C5", "C4", "C3", "C2", "C1"]
            .iter()
            .map(|id| CommitRef::new(*id, *id))
            .collect()
    }

    fn ids(commits: &[CommitRef]) -> Vec<&str> {
        commits.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_commits_between_checkpoint_and_target() {
        let options = RunOptions {
            commit_id: Some("C4".into()),
            ..Default::default()
        };
        let worklist = build_worklist(&history(), &options, Some("C1")).unwrap();
        assert_eq!(ids(&worklist), vec!["C4", "C3", "C2"]);
    }

    #[test]
    fn test_defaults_to_newest_commit() {
        let worklist = build_worklist(&history(), &RunOptions::default(), Some("C3")).unwrap();
        assert_eq!(ids(&worklist), vec!["C5", "C4"]);
    }

    #[test]
    fn test_checkpoint_equal_to_target_is_empty() {
        let worklist = build_worklist(&history(), &RunOptions::default(), Some("C5")).unwrap();
        assert!(worklist.is_empty());
    }

    #[test]
    fn test_missing_checkpoint() {
        assert!(matches!(
            build_worklist(&history(), &RunOptions::default(), None),
            Err(AppError::NoLastCommitFound)
        ));
    }

    #[test]
    fn test_fast_forward_needs_no_checkpoint() {
        let options = RunOptions {
            flags: RunFlags {
                fast_forward: true,
                ..Default::default()
            },
            commit_id: Some("C2".into()),
            ..Default::default()
        };
        let worklist = build_worklist(&history(), &options, None).unwrap();
        assert_eq!(ids(&worklist), vec!["C2"]);
    }

    #[test]
    fn test_unknown_target() {
        let options = RunOptions {
            commit_id: Some("C9".into()),
            ..Default::default()
        };
        assert!(matches!(
            build_worklist(&history(), &options, Some("C1")),
            Err(AppError::TargetCommitNotFound(_))
        ));
    }
}
