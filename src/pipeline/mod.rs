//! Change pipeline
//!
//! Turns repository history into an ordered [`ChangeLog`](crate::models::ChangeLog)
//! and drives a run against a target:
//!
//! 1. **Worklist**: commits and per-commit file changes since the checkpoint
//! 2. **Assembler**: parse and order the changed specs into bundles
//! 3. **Orchestrator**: validate, render and apply the assembled log

pub mod assembler;
pub mod orchestrator;
pub mod worklist;

pub use orchestrator::Orchestrator;
