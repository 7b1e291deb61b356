//! Target systems
//!
//! A [`Target`] validates, renders and applies a [`ChangeLog`] and keeps the
//! tracking history on the system it changes. The role-based warehouse is
//! the reference implementation.

pub mod metadata;
pub mod rendering;
pub mod session;
pub mod validation;
pub mod warehouse;

use crate::config::EnvironmentSettings;
use crate::error::{AppError, AppResult};
use crate::models::{ChangeLog, LogEntry, LogItemEntry, ObjectTypeTranslator, RunOptions, TrackingLog};
use crate::secrets::SecretStore;
use async_trait::async_trait;
pub use rendering::RenderedChange;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation, checked by the apply loop between items
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait Target: Send + Sync {
    /// Up to `depth` most recent tracking entries (all when zero), oldest first
    async fn tracking_history(&self, depth: usize) -> AppResult<TrackingLog>;

    async fn tracking_log_detail(&self, entry: &LogEntry) -> AppResult<Vec<LogItemEntry>>;

    async fn persist_tracking_log_entry(&self, entry: &LogEntry) -> AppResult<()>;

    async fn persist_tracking_log_detail(&self, detail: &LogItemEntry) -> AppResult<()>;

    async fn validate_change_log(&mut self, changes: &mut ChangeLog) -> AppResult<()>;

    /// Render every eligible item into scopes; ineligible items are marked skipped
    fn render_change_log(&mut self, changes: &mut ChangeLog) -> AppResult<Vec<RenderedChange>>;

    /// Render and apply, then record what was applied
    async fn apply_change_log(&mut self, cancel: &CancellationFlag, changes: &mut ChangeLog) -> AppResult<()>;

    async fn close(&mut self) -> AppResult<()>;

    fn object_type_translator(&self) -> ObjectTypeTranslator;

    fn object_type_execution_order(&self) -> Vec<i64>;

    fn object_type_name(&self, object_type: i64) -> String;
}

/// Connect to the target named by the environment's `target_type`
pub async fn open_target(
    env: &EnvironmentSettings,
    options: &RunOptions,
    secrets: Arc<dyn SecretStore>,
) -> AppResult<Box<dyn Target>> {
    match env.target_type.trim().to_lowercase().as_str() {
        "warehouse" | "snowflake" => Ok(Box::new(
            warehouse::WarehouseTarget::open(env, options.clone(), secrets).await?,
        )),
        other => Err(AppError::InvalidTargetType(other.to_string())),
    }
}

/// Object type id of a declarative type name, without opening a connection
pub fn translator_for(target_type: &str) -> AppResult<ObjectTypeTranslator> {
    match target_type.trim().to_lowercase().as_str() {
        "warehouse" | "snowflake" => Ok(warehouse::object_types::translate),
        other => Err(AppError::InvalidTargetType(other.to_string())),
    }
}
