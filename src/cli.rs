//! Command-line interface

use crate::config::DEFAULT_ENVIRONMENT;
use crate::error::AppResult;
use crate::models::{FileInfo, RunFlags, RunOptions};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "groundwork", version, about = "Apply declarative object specifications from git to a warehouse")]
pub struct Cli {
    /// Configuration file (defaults to $HOME/.groundwork.yaml)
    #[arg(long, global = true, env = "GROUNDWORK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Environment to run against
    #[arg(short, long, global = true, default_value = DEFAULT_ENVIRONMENT)]
    pub env: String,

    /// Treat the full tree of the target commit as the desired state
    #[arg(long, visible_alias = "full", global = true)]
    pub fast_forward: bool,

    /// Commit to work towards (full id or a unique prefix)
    #[arg(long, global = true)]
    pub commit: Option<String>,

    /// Read history from the repository in the working directory
    #[arg(long, global = true)]
    pub local: bool,

    /// Branch to read instead of the configured one
    #[arg(long, global = true)]
    pub branch: Option<String>,

    /// Apply a single specification file outside of git history
    #[arg(long, global = true)]
    pub file: Option<PathBuf>,

    #[arg(long, global = true)]
    pub skip_validation: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Print results as JSON instead of a tree
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Clone the environment's repository
    Clone { directory: PathBuf },
    /// List branches, commits or pending changes
    List {
        #[command(subcommand)]
        what: ListCommand,
    },
    /// Validate pending changes against the target
    Validate,
    /// Validate and render pending changes without applying them
    Render,
    /// Validate, render and apply pending changes
    Apply,
    /// Show the tracking log
    History {
        /// Number of entries, zero for all
        #[arg(long, default_value_t = 10)]
        depth: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum ListCommand {
    Branches,
    Commits,
    Changes,
}

impl Cli {
    /// Run options for the core pipeline; reads `--file` when given
    pub fn run_options(&self) -> AppResult<RunOptions> {
        let file = match &self.file {
            Some(path) => Some(FileInfo {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
                bytes: std::fs::read(path)?,
            }),
            None => None,
        };

        Ok(RunOptions {
            flags: RunFlags {
                skip_validation: self.skip_validation,
                fast_forward: self.fast_forward,
                single_file_change: file.is_some(),
                use_local_repository: self.local,
            },
            commit_id: self.commit.clone(),
            branch_override: self.branch.clone(),
            file,
        })
    }
}
