//! Run context
//!
//! Everything one invocation needs, resolved once from the configuration
//! file and the command line: the selected environment, its secret store
//! and the run options.

use crate::config::{EnvironmentSettings, Settings};
use crate::error::AppResult;
use crate::models::RunOptions;
use crate::pipeline::Orchestrator;
use crate::secrets::{open_secret_store, SecretStore};
use crate::target::{open_target, Target};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Resolved state shared by every command of one invocation
pub struct RunContext {
    pub env_name: String,
    pub env: EnvironmentSettings,
    pub secrets: Arc<dyn SecretStore>,
    pub options: RunOptions,
    /// Repository path for local runs; the working directory when unset
    pub local_path: Option<PathBuf>,
}

impl RunContext {
    /// Load the configuration and select `env_name`
    pub fn load(config_path: Option<&Path>, env_name: &str, options: RunOptions) -> AppResult<Self> {
        let settings = Settings::load(config_path)?;
        Self::from_settings(&settings, env_name, options)
    }

    pub fn from_settings(settings: &Settings, env_name: &str, options: RunOptions) -> AppResult<Self> {
        let env = settings.environment(env_name)?;
        let secrets: Arc<dyn SecretStore> =
            Arc::from(open_secret_store(&env.secret_store_type, &env.secret_store)?);

        debug!(
            "Environment {}: target {} ({}), secrets {}",
            env_name, env.target_type, env.target.database, env.secret_store_type
        );

        Ok(Self {
            env_name: env_name.to_string(),
            env,
            secrets,
            options,
            local_path: None,
        })
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let orchestrator = Orchestrator::new(self.env.clone(), self.options.clone(), self.secrets.clone());
        match &self.local_path {
            Some(path) => orchestrator.with_local_path(path),
            None => orchestrator,
        }
    }

    pub async fn open_target(&self) -> AppResult<Box<dyn Target>> {
        open_target(&self.env, &self.options, self.secrets.clone()).await
    }
}
