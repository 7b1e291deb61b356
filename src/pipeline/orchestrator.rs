//! Orchestrator - drives one run from repository discovery to apply

use crate::config::EnvironmentSettings;
use crate::error::{AppError, AppResult};
use crate::models::{ChangeLog, LogEntry, LogItemEntry, RunOptions, TrackingLog};
use crate::pipeline::assembler::{assemble_manual, ChangeLogAssembler};
use crate::secrets::SecretStore;
use crate::source::{ChangeSource, CommitRef, GitRepository};
use crate::target::{CancellationFlag, RenderedChange, Target};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Tracking entries needed to find the checkpoint
const CHECKPOINT_DEPTH: usize = 1;

/// Runs the stages of the change pipeline for one environment
pub struct Orchestrator {
    env: EnvironmentSettings,
    options: RunOptions,
    secrets: Arc<dyn SecretStore>,
    local_path: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(env: EnvironmentSettings, options: RunOptions, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            env,
            options,
            secrets,
            local_path: None,
        }
    }

    /// Repository used in local mode instead of the working directory
    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Open the repository the run reads from
    pub fn open_source(&self) -> AppResult<GitRepository> {
        let mut repo = if self.options.flags.use_local_repository {
            let path = match &self.local_path {
                Some(path) => path.clone(),
                None => std::env::current_dir()?,
            };
            GitRepository::open_local(&path)?
        } else {
            GitRepository::clone_remote(&self.env.git, self.secrets.as_ref())?
        };

        if let Some(branch) = &self.options.branch_override {
            repo.set_branch_reference(branch);
        }
        Ok(repo)
    }

    /// Clone the configured repository into `directory`
    pub fn clone_into(&self, directory: &Path) -> AppResult<()> {
        GitRepository::clone_into(&self.env.git, self.secrets.as_ref(), directory)?;
        info!("Cloned into {}", directory.display());
        Ok(())
    }

    pub fn list_branches(&self) -> AppResult<Vec<String>> {
        self.open_source()?.branches()
    }

    pub fn list_commits(&self) -> AppResult<Vec<CommitRef>> {
        self.open_source()?.list_commits(None)
    }

    /// Discover the unapplied work for this run
    pub async fn generate_change_log(&self, target: &dyn Target) -> AppResult<ChangeLog> {
        let translator = target.object_type_translator();
        let flags = self.options.flags;

        if flags.single_file_change {
            let file = self
                .options
                .file
                .as_ref()
                .ok_or_else(|| AppError::Config("single-file run without a file".to_string()))?;
            info!("Single-file change from {}", file.name);
            return assemble_manual(file, translator);
        }

        // Fast-forward rebuilds from a full tree and needs no checkpoint.
        let tracking = if flags.fast_forward {
            TrackingLog::new()
        } else {
            target.tracking_history(CHECKPOINT_DEPTH).await?
        };
        if let Some(last) = tracking.last_processed() {
            info!("Last processed commit: {}", last.tracking_id);
        }

        let repo = self.open_source()?;
        ChangeLogAssembler::new(&repo, translator).assemble(&self.options, &tracking)
    }

    pub async fn validate(&self, target: &mut dyn Target, changes: &mut ChangeLog) -> AppResult<()> {
        info!("Validating {} items", changes.total_items());
        target.validate_change_log(changes).await
    }

    pub async fn render(&self, target: &mut dyn Target, changes: &mut ChangeLog) -> AppResult<Vec<RenderedChange>> {
        self.validate(target, changes).await?;
        let rendered = target.render_change_log(changes)?;
        info!("Rendered {} of {} items", rendered.len(), changes.total_items());
        Ok(rendered)
    }

    /// Validate, then render and apply. The change log carries per-item
    /// outcomes whether or not the run succeeds.
    pub async fn apply(
        &self,
        target: &mut dyn Target,
        cancel: &CancellationFlag,
        changes: &mut ChangeLog,
    ) -> AppResult<()> {
        self.validate(target, changes).await?;
        let result = target.apply_change_log(cancel, changes).await;
        if let Err(e) = &result {
            warn!("Apply finished with error: {}", e);
        }
        result
    }

    /// Tracking history, oldest first, each entry with its item details
    pub async fn history(
        &self,
        target: &dyn Target,
        depth: usize,
    ) -> AppResult<Vec<(LogEntry, Vec<LogItemEntry>)>> {
        let log = target.tracking_history(depth).await?;
        let mut history = Vec::with_capacity(log.len());
        for entry in log.entries() {
            let details = target.tracking_log_detail(entry).await?;
            history.push((entry.clone(), details));
        }
        Ok(history)
    }
}
