//! Resource coordinator
//!
//! Owners collected during rendering get temporary usage on the shared
//! warehouse while the run applies, and lose it again afterwards.

use super::statements::{GRANT_USAGE, REVOKE_USAGE, USE_ROLE};
use crate::error::{AppError, AppResult};
use crate::target::rendering::render_statement;
use crate::target::session::Session;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct ResourceCoordinator {
    warehouse: String,
    default_role: String,
    owners: Vec<String>,
    active: bool,
}

impl ResourceCoordinator {
    pub fn new(warehouse: &str, default_role: &str) -> Self {
        Self {
            warehouse: warehouse.to_string(),
            default_role: default_role.to_string(),
            owners: Vec::new(),
            active: false,
        }
    }

    /// Remember a role that statements will run under
    pub fn register_owner(&mut self, role: &str) {
        let role = role.trim().to_string();
        if role.is_empty() || role.eq_ignore_ascii_case(&self.default_role) {
            return;
        }
        if !self.owners.iter().any(|r| r.eq_ignore_ascii_case(&role)) {
            self.owners.push(role);
        }
    }

    pub fn owners(&self) -> &[String] {
        &self.owners
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn usage_statement(&self, template: &str, role: &str) -> AppResult<String> {
        render_statement(
            template,
            &[
                ("OBJECT", "WAREHOUSE"),
                ("NAME", self.warehouse.as_str()),
                ("KIND", "ROLE"),
                ("GRANTEE", role),
            ],
        )
    }

    /// Grant warehouse usage to every registered owner. Idempotent.
    pub async fn activate(&mut self, session: &dyn Session) -> AppResult<()> {
        if self.active {
            return Ok(());
        }
        // Marked before granting so a partial activation is still released.
        self.active = true;

        session
            .execute(&render_statement(USE_ROLE, &[("ROLE", self.default_role.as_str())])?)
            .await?;
        for owner in &self.owners {
            session
                .execute(&self.usage_statement(GRANT_USAGE, owner)?)
                .await?;
        }

        info!(
            "Granted usage on {} to {} owner roles",
            self.warehouse,
            self.owners.len()
        );
        Ok(())
    }

    /// Revoke the temporary grants. A no-op when not active.
    ///
    /// Every revoke is attempted; any failure is reported as
    /// [`AppError::ResourceLeak`] naming the roles left with usage.
    pub async fn deactivate(&mut self, session: &dyn Session) -> AppResult<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        let mut leaked = Vec::new();
        if let Err(e) = session
            .execute(&render_statement(USE_ROLE, &[("ROLE", self.default_role.as_str())])?)
            .await
        {
            error!("Unable to restore {} before revoking: {}", self.default_role, e);
        }

        for owner in &self.owners {
            let revoked = match self.usage_statement(REVOKE_USAGE, owner) {
                Ok(statement) => session.execute(&statement).await,
                Err(e) => Err(e),
            };
            if let Err(e) = revoked {
                error!("Failed to revoke usage on {} from {}: {}", self.warehouse, owner, e);
                leaked.push(owner.clone());
            }
        }

        if leaked.is_empty() {
            info!("Revoked temporary usage on {}", self.warehouse);
            Ok(())
        } else {
            Err(AppError::ResourceLeak(format!(
                "usage on warehouse {} still granted to {}",
                self.warehouse,
                leaked.join(", ")
            )))
        }
    }
}
