//! Role-based SQL warehouse target
//!
//! Objects live in a warehouse → database → schema hierarchy, access is
//! granted to roles, and statements run on a shared compute warehouse that
//! owner roles only use through temporary grants.

pub mod coordinator;
pub mod exists_validator;
pub mod object_types;
pub mod renderer;
pub mod specs;
pub mod statements;
pub mod structure_validator;
pub mod tracking;

use self::exists_validator::ExistsValidator;
use self::object_types::{execution_order, is_protected_role, translate, ObjectType};
use self::renderer::WarehouseRenderer;
use self::statements::USE_ROLE;
use self::structure_validator::StructureValidator;
use self::tracking::TrackingStore;
use super::rendering::{render_statement, RenderedChange};
use super::session::{PgSession, Session};
use super::validation::ValidationHandler;
use super::{CancellationFlag, Target};
use crate::config::{EnvironmentSettings, TargetSettings};
use crate::error::{AppError, AppResult};
use crate::models::{
    ChangeItem, ChangeLog, LogEntry, LogItemEntry, ObjectTypeTranslator, RunOptions, TrackingLog,
    VariableSource,
};
use crate::secrets::SecretStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const NOT_SUPPORTED: &str = "object type is not supported by this target";
const REQUIRES_VALIDATION: &str = "item requires validation but its bundle was not validated";
const FAILED_VALIDATION: &str = "item failed validation";
const NOT_REACHED: &str = "not executed: run halted";

/// How far an apply run got
#[derive(Debug, Default)]
struct ApplyProgress {
    /// Number of bundles the loop entered
    reached: usize,
    /// Bundle whose item stopped the run
    halted: Option<usize>,
}

pub struct WarehouseTarget {
    session: Arc<dyn Session>,
    settings: TargetSettings,
    options: RunOptions,
    secrets: Arc<dyn SecretStore>,
    vars: HashMap<String, String>,
    renderer: WarehouseRenderer,
    tracking: TrackingStore,
}

impl WarehouseTarget {
    /// Connect, then make sure the tracking tables exist
    pub async fn open(
        env: &EnvironmentSettings,
        options: RunOptions,
        secrets: Arc<dyn SecretStore>,
    ) -> AppResult<Self> {
        if is_protected_role(&env.target.role) {
            return Err(AppError::DisallowedPrivilegedRole(env.target.role.clone()));
        }
        let password = match &env.target.password_secret {
            Some(key) => Some(secrets.get_secret(key)?),
            None => None,
        };

        let session = PgSession::connect(&env.target, password).await?;
        let target = Self::with_session(Arc::new(session), env, options, secrets)?;

        if let Err(e) = target.tracking.ensure_tables(target.session.as_ref()).await {
            warn!("Unable to prepare tracking tables: {}", e);
        }
        Ok(target)
    }

    /// Build a target over an existing session
    pub fn with_session(
        session: Arc<dyn Session>,
        env: &EnvironmentSettings,
        options: RunOptions,
        secrets: Arc<dyn SecretStore>,
    ) -> AppResult<Self> {
        let settings = env.target.clone();
        if is_protected_role(&settings.role) {
            return Err(AppError::DisallowedPrivilegedRole(settings.role));
        }

        Ok(Self {
            renderer: WarehouseRenderer::new(&settings.role, &settings.warehouse),
            tracking: TrackingStore::new(&settings.database, &settings.tracking_schema),
            session,
            settings,
            options,
            secrets,
            vars: env.vars.clone(),
        })
    }

    fn applied_by(&self) -> &str {
        if self.settings.user.trim().is_empty() {
            &self.settings.role
        } else {
            &self.settings.user
        }
    }

    async fn reset_role(&self) -> AppResult<()> {
        let statement = render_statement(USE_ROLE, &[("ROLE", self.settings.role.as_str())])?;
        self.session.execute(&statement).await
    }

    /// Why an item must not be applied, if it must not
    fn skip_reason(&self, bundle_validated: bool, item: &ChangeItem) -> Option<&'static str> {
        let skip_validation = self.options.flags.skip_validation;
        if (!bundle_validated || skip_validation) && item.spec.options.validate {
            Some(REQUIRES_VALIDATION)
        } else if bundle_validated && !skip_validation && !item.validation.passed_validation() {
            Some(FAILED_VALIDATION)
        } else {
            None
        }
    }

    async fn apply_items(
        &self,
        cancel: &CancellationFlag,
        changes: &mut ChangeLog,
        rendered: &[RenderedChange],
        progress: &mut ApplyProgress,
    ) -> AppResult<()> {
        for (index, bundle) in changes.bundles.iter_mut().enumerate() {
            progress.reached = index + 1;
            info!(
                "Applying bundle {} ({})",
                bundle.reference.hash, bundle.reference.message
            );

            for change in rendered.iter().filter(|c| c.bundle == index) {
                if cancel.is_cancelled() {
                    progress.halted = Some(index);
                    warn!("Apply cancelled before {}", bundle.items[change.item].metadata.name);
                    return Err(AppError::Cancelled);
                }

                let item = &mut bundle.items[change.item];
                let applied = match self.reset_role().await {
                    Ok(()) => apply_item(self.session.as_ref(), item).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = applied {
                    error!("Apply halted at {}: {}", item.metadata.name, e);
                    progress.halted = Some(index);
                    return Err(e);
                }
                info!("Applied {} {}", item.spec.object_type, item.spec.object.name);
            }
        }
        Ok(())
    }

    /// Record every bundle the apply loop reached
    async fn track(&self, changes: &ChangeLog, progress: &ApplyProgress, start: DateTime<Utc>) -> AppResult<()> {
        let end = Utc::now();
        let single_file = self.options.flags.single_file_change;

        for bundle in changes.bundles.iter().take(progress.reached) {
            let total = bundle.items.len();
            let success = bundle
                .items
                .iter()
                .filter(|i| i.apply.is_success().success)
                .count();

            // Manual files never become the checkpoint.
            if !single_file {
                let entry = LogEntry {
                    tracking_id: bundle.reference.hash.clone(),
                    message: bundle.reference.message.clone(),
                    start,
                    end,
                    applied_by: self.applied_by().to_string(),
                    total,
                    success,
                    failed: total - success,
                    completed: progress.halted != Some(bundle.index),
                    fast_forward: self.options.flags.fast_forward,
                };
                self.persist_tracking_log_entry(&entry)
                    .await
                    .map_err(|e| {
                        AppError::Tracking(format!("entry for {}: {}", bundle.reference.hash, e))
                    })?;
            }

            for item in &bundle.items {
                let outcome = item.apply.is_success();
                let detail = LogItemEntry {
                    tracking_id: bundle.reference.hash.clone(),
                    file: item.metadata.name.clone(),
                    object_type: ObjectType::from_id(item.object_type).name().to_string(),
                    object_name: item.spec.object.name.clone(),
                    identifier_hash: item.metadata.identifier_hash.clone(),
                    git_hash: item.metadata.git_hash.clone(),
                    executed: item.apply.executed,
                    success: outcome.success,
                    partial: outcome.partial,
                    message: outcome.error.unwrap_or_else(|| "applied".to_string()),
                    logged_at: Utc::now(),
                };
                if let Err(e) = self.persist_tracking_log_detail(&detail).await {
                    warn!("Unable to record outcome of {}: {}", item.metadata.name, e);
                }
            }
        }
        Ok(())
    }
}

/// Execute an item's scopes in order; the first failing statement stops it
/// Flag rendered items a halted run never got to
fn mark_unreached(changes: &mut ChangeLog, rendered: &[RenderedChange]) {
    for change in rendered {
        let item = changes
            .bundles
            .get_mut(change.bundle)
            .and_then(|bundle| bundle.items.get_mut(change.item));
        if let Some(item) = item {
            if !item.apply.executed && item.apply.error.is_none() {
                item.apply.skip(NOT_REACHED);
            }
        }
    }
}

async fn apply_item(session: &dyn Session, item: &mut ChangeItem) -> AppResult<()> {
    item.apply.executed = true;
    let mut item_progress = false;

    for scope in item.apply.scopes.iter_mut() {
        let mut scope_progress = false;
        let mut failure = None;
        for statement in &scope.statements {
            match session.execute(statement).await {
                Ok(()) => scope_progress = true,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            let message = e.to_string();
            scope.set_effect(false, scope_progress || item_progress, Some(message.clone()));
            item.apply.error = Some(message);
            item.apply.completed = false;
            return Err(e);
        }
        debug!("Scope {} of {} succeeded", scope.name, item.spec.object.name);
        scope.set_effect(true, false, None);
        item_progress = true;
    }

    item.apply.completed = item.apply.all_scopes_succeeded();
    Ok(())
}

#[async_trait]
impl Target for WarehouseTarget {
    async fn tracking_history(&self, depth: usize) -> AppResult<TrackingLog> {
        self.tracking.history(self.session.as_ref(), depth).await
    }

    async fn tracking_log_detail(&self, entry: &LogEntry) -> AppResult<Vec<LogItemEntry>> {
        self.tracking
            .detail(self.session.as_ref(), &entry.tracking_id)
            .await
    }

    async fn persist_tracking_log_entry(&self, entry: &LogEntry) -> AppResult<()> {
        self.tracking.persist_entry(self.session.as_ref(), entry).await
    }

    async fn persist_tracking_log_detail(&self, detail: &LogItemEntry) -> AppResult<()> {
        self.tracking.persist_detail(self.session.as_ref(), detail).await
    }

    async fn validate_change_log(&mut self, changes: &mut ChangeLog) -> AppResult<()> {
        if self.options.flags.skip_validation {
            info!("Validation skipped");
            return Ok(());
        }

        let mut handler = ValidationHandler::new(translate);
        handler.add_global(Box::new(ExistsValidator::new(
            self.session.clone(),
            &self.settings.database,
            translate,
        )));
        handler.add_for_type(
            ObjectType::Table.id(),
            Box::new(StructureValidator::new(
                self.session.clone(),
                self.secrets.clone(),
                self.vars.clone(),
                &self.settings.database,
            )),
        );

        handler
            .validate_change_log(changes, &execution_order())
            .await
    }

    fn render_change_log(&mut self, changes: &mut ChangeLog) -> AppResult<Vec<RenderedChange>> {
        let order = execution_order();
        let mut rendered = Vec::new();

        for bundle in changes.bundles.iter_mut() {
            for item in bundle.items.iter_mut().filter(|i| !order.contains(&i.object_type)) {
                item.apply = Default::default();
                item.apply.skip(NOT_SUPPORTED);
            }

            for &object_type in &order {
                for position in bundle.indices_of_type(object_type) {
                    let validated = bundle.validated;
                    let item = &mut bundle.items[position];
                    item.apply = Default::default();

                    if let Some(reason) = self.skip_reason(validated, item) {
                        debug!("Skipping {}: {}", item.metadata.name, reason);
                        item.apply.skip(reason);
                        continue;
                    }

                    let source = VariableSource {
                        config_vars: &self.vars,
                        secrets: self.secrets.as_ref(),
                    };
                    match self.renderer.render(item, &source) {
                        Ok(scopes) => {
                            item.apply.scopes = scopes;
                            rendered.push(RenderedChange {
                                bundle: bundle.index,
                                item: position,
                                object_type,
                            });
                        }
                        Err(e) => {
                            warn!("Unable to render {}: {}", item.metadata.name, e);
                            item.apply.skip(format!("render failed: {}", e));
                        }
                    }
                }
            }
        }

        Ok(rendered)
    }

    async fn apply_change_log(&mut self, cancel: &CancellationFlag, changes: &mut ChangeLog) -> AppResult<()> {
        let start = Utc::now();
        let rendered = self.render_change_log(changes)?;
        info!(
            "Applying {} of {} items across {} bundles",
            rendered.len(),
            changes.total_items(),
            changes.bundles.len()
        );

        let mut progress = ApplyProgress::default();
        let session = self.session.clone();

        let mut outcome = self.reset_role().await;
        if outcome.is_ok() {
            outcome = self.renderer.coordinator_mut().activate(session.as_ref()).await;
        }
        if outcome.is_ok() {
            outcome = self
                .apply_items(cancel, changes, &rendered, &mut progress)
                .await;
        }

        // Released on every path, including a failed activation.
        let released = self
            .renderer
            .coordinator_mut()
            .deactivate(session.as_ref())
            .await;
        if let Err(e) = self.reset_role().await {
            warn!("Unable to restore {} after apply: {}", self.settings.role, e);
        }

        if outcome.is_err() {
            mark_unreached(changes, &rendered);
        }
        let tracked = self.track(changes, &progress, start).await;

        match (released, outcome, tracked) {
            (Err(leak), _, _) => {
                error!("{}", leak);
                Err(leak)
            }
            (Ok(()), Err(e), _) => Err(e),
            (Ok(()), Ok(()), tracked) => tracked,
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        let session = self.session.clone();
        self.renderer
            .coordinator_mut()
            .deactivate(session.as_ref())
            .await
    }

    fn object_type_translator(&self) -> ObjectTypeTranslator {
        translate
    }

    fn object_type_execution_order(&self) -> Vec<i64> {
        execution_order()
    }

    fn object_type_name(&self, object_type: i64) -> String {
        ObjectType::from_id(object_type).name().to_string()
    }
}
