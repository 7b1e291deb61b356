//! Change log assembler
//!
//! Turns the worklist into bundles of parsed, type-indexed items.

use crate::error::{AppError, AppResult};
use crate::models::{
    ChangeAction, ChangeLog, ChangeMetadata, ChangeReference, FileInfo, ObjectTypeTranslator,
    RunOptions, TrackingLog,
};
use crate::pipeline::worklist::build_worklist;
use crate::source::{ChangeSource, CommitRef, DiffAction};
use tracing::{debug, info};

pub struct ChangeLogAssembler<'a> {
    source: &'a dyn ChangeSource,
    translator: ObjectTypeTranslator,
}

impl<'a> ChangeLogAssembler<'a> {
    pub fn new(source: &'a dyn ChangeSource, translator: ObjectTypeTranslator) -> Self {
        Self { source, translator }
    }

    /// Build the change log for everything newer than the tracking checkpoint
    pub fn assemble(&self, options: &RunOptions, tracking: &TrackingLog) -> AppResult<ChangeLog> {
        let history = self
            .source
            .list_commits(options.branch_override.as_deref())?;

        let checkpoint = if options.flags.fast_forward || options.flags.single_file_change {
            None
        } else {
            let last = tracking
                .last_processed()
                .ok_or(AppError::NoLastCommitFound)?;
            if !history.iter().any(|c| c.id == last.tracking_id) {
                return Err(AppError::ReferenceNotFound(format!(
                    "checkpoint {} is not in the history of the selected branch",
                    last.tracking_id
                )));
            }
            Some(last.tracking_id.clone())
        };

        let worklist = build_worklist(&history, options, checkpoint.as_deref())?;
        if worklist.is_empty() {
            return Err(AppError::NoCommitsToProcess);
        }

        match checkpoint {
            Some(previous) => self.from_history(&worklist, previous),
            None => self.from_snapshot(&worklist[0]),
        }
    }

    /// One bundle per commit, oldest first, each diffed against its predecessor
    fn from_history(&self, worklist: &[CommitRef], checkpoint: String) -> AppResult<ChangeLog> {
        let mut log = ChangeLog::new(self.translator);
        let mut previous = checkpoint;

        for commit in worklist.iter().rev() {
            let bundle = log.add_bundle(ChangeReference::new(&commit.id, commit.summary()));

            for entry in self.source.diff(&previous, &commit.id)? {
                let action = match entry.action {
                    DiffAction::Delete => continue,
                    DiffAction::Add => ChangeAction::Add,
                    DiffAction::Modify => ChangeAction::Update,
                    DiffAction::Other => ChangeAction::Undetermined,
                };
                let bytes = self.source.read_blob(&commit.id, &entry.path)?;
                let metadata = ChangeMetadata::from_path(action, &entry.path, &entry.blob_id);
                bundle.add_item(&bytes, metadata)?;
            }

            debug!(
                "Bundle {} ({}) holds {} items",
                bundle.index,
                commit.id,
                bundle.items.len()
            );
            previous = commit.id.clone();
        }

        info!("Assembled {} bundles with {} items", log.bundles.len(), log.total_items());
        Ok(log)
    }

    /// A single bundle holding the full tree of `commit`
    fn from_snapshot(&self, commit: &CommitRef) -> AppResult<ChangeLog> {
        let mut log = ChangeLog::new(self.translator);
        let bundle = log.add_bundle(ChangeReference::new(&commit.id, commit.summary()));

        for file in self.source.full_tree(&commit.id)? {
            let metadata =
                ChangeMetadata::from_path(ChangeAction::Undetermined, &file.path, &file.blob_id);
            bundle.add_item(&file.bytes, metadata)?;
        }

        info!(
            "Assembled fast-forward snapshot of {} with {} items",
            commit.id,
            log.total_items()
        );
        Ok(log)
    }
}

/// Ad-hoc change log for one externally supplied file
pub fn assemble_manual(file: &FileInfo, translator: ObjectTypeTranslator) -> AppResult<ChangeLog> {
    let mut log = ChangeLog::new(translator);
    let bundle = log.add_bundle(ChangeReference::manual());
    let added = bundle.add_item(&file.bytes, ChangeMetadata::manual(&file.name, &file.bytes))?;
    if !added {
        return Err(AppError::NoCommitsToProcess);
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::change_log::fixtures::{spec_yaml, translate};
    use crate::models::{LogEntry, RunFlags};
    use crate::source::testing::MemorySource;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn tracking(checkpoint: &str) -> TrackingLog {
        let mut log = TrackingLog::new();
        log.add(LogEntry {
            tracking_id: checkpoint.to_string(),
            message: String::new(),
            start: Utc::now(),
            end: Utc::now(),
            applied_by: "LOADER".into(),
            total: 0,
            success: 0,
            failed: 0,
            completed: true,
            fast_forward: false,
        });
        log
    }

    fn source() -> MemorySource {
        let orders = spec_yaml("table", "ORDERS");
        let orders_v2 = format!("{}options:\n  drop: false\n", orders);
        let items = spec_yaml("table", "ITEMS");
        let analyst = spec_yaml("role", "ANALYST");

        MemorySource::default()
            .commit("C1", &[("t/orders.yaml", orders.as_str())])
            .commit("C2", &[("t/orders.yaml", orders_v2.as_str()), ("notes.txt", "x")])
            .commit("C3", &[("t/orders.yaml", orders_v2.as_str()), ("t/items.yaml", items.as_str())])
            .commit("C4", &[("t/items.yaml", items.as_str()), ("roles.yaml", analyst.as_str())])
    }

    #[test]
    fn test_bundles_are_oldest_first_and_diffed_pairwise() {
        let source = source();
        let assembler = ChangeLogAssembler::new(&source, translate);
        let log = assembler.assemble(&RunOptions::default(), &tracking("C1")).unwrap();

        let refs: Vec<&str> = log.bundles.iter().map(|b| b.reference.hash.as_str()).collect();
        assert_eq!(refs, vec!["C2", "C3", "C4"]);

        let names = |i: usize| -> Vec<(String, ChangeAction)> {
            log.bundles[i]
                .items
                .iter()
                .map(|it| (it.metadata.name.clone(), it.metadata.action))
                .collect()
        };
        assert_eq!(names(0), vec![("t/orders.yaml".to_string(), ChangeAction::Update)]);
        assert_eq!(names(1), vec![("t/items.yaml".to_string(), ChangeAction::Add)]);
        // The delete of t/orders.yaml in C4 is not an item.
        assert_eq!(names(2), vec![("roles.yaml".to_string(), ChangeAction::Add)]);
    }

    #[test]
    fn test_nothing_newer_than_checkpoint() {
        let source = source();
        let assembler = ChangeLogAssembler::new(&source, translate);
        assert!(matches!(
            assembler.assemble(&RunOptions::default(), &tracking("C4")),
            Err(AppError::NoCommitsToProcess)
        ));
    }

    #[test]
    fn test_empty_tracking_log_requires_fast_forward() {
        let source = source();
        let assembler = ChangeLogAssembler::new(&source, translate);
        assert!(matches!(
            assembler.assemble(&RunOptions::default(), &TrackingLog::new()),
            Err(AppError::NoLastCommitFound)
        ));
    }

    #[test]
    fn test_fast_forward_reads_full_tree() {
        let source = source();
        let assembler = ChangeLogAssembler::new(&source, translate);
        let options = RunOptions {
            flags: RunFlags {
                fast_forward: true,
                ..Default::default()
            },
            commit_id: Some("C3".into()),
            ..Default::default()
        };

        let log = assembler.assemble(&options, &TrackingLog::new()).unwrap();
        assert_eq!(log.bundles.len(), 1);
        assert_eq!(log.bundles[0].reference.hash, "C3");
        assert_eq!(log.bundles[0].changes_of_type(4).len(), 2);
        assert!(log
            .items()
            .all(|i| i.metadata.action == ChangeAction::Undetermined));
    }

    #[test]
    fn test_manual_file() {
        let file = FileInfo {
            name: "orders.yaml".into(),
            bytes: spec_yaml("table", "ORDERS").into_bytes(),
        };
        let log = assemble_manual(&file, translate).unwrap();
        assert_eq!(log.bundles[0].reference, ChangeReference::manual());
        assert_eq!(log.total_items(), 1);

        let not_a_spec = FileInfo {
            name: "orders.txt".into(),
            bytes: Vec::new(),
        };
        assert!(assemble_manual(&not_a_spec, translate).is_err());
    }
}
