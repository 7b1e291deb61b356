//! Application configuration module
//!
//! Loads the environment-keyed system configuration from a YAML file,
//! overlaid with `GROUNDWORK__*` environment variables.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use validator::Validate;

/// Default environment name used when none is given on the command line
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// File name looked up in the user's home directory
pub const DEFAULT_CONFIG_FILE: &str = ".groundwork.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),
}

/// Connection settings for the target warehouse
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TargetSettings {
    #[validate(url)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[validate(length(min = 1))]
    pub role: String,
    #[validate(length(min = 1))]
    pub warehouse: String,
    /// Change-management database; hosts the tracking tables and shadow objects
    #[validate(length(min = 1))]
    pub database: String,
    #[serde(default)]
    pub password_secret: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_tracking_schema")]
    pub tracking_schema: String,
}

fn default_tracking_schema() -> String {
    "CHANGE_TRACKING".to_string()
}

/// Git repository settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct GitSettings {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub url: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
    #[serde(default)]
    pub password_secret: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Secret store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretStoreSettings {
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for SecretStoreSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

fn default_namespace() -> String {
    "GROUNDWORK".to_string()
}

/// One named environment (target, repository, secrets and config vars)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnvironmentSettings {
    #[serde(default = "default_target_type")]
    pub target_type: String,
    #[serde(default = "default_secret_store_type")]
    pub secret_store_type: String,
    #[serde(default)]
    pub secret_store: SecretStoreSettings,
    #[validate(nested)]
    pub target: TargetSettings,
    #[serde(default)]
    #[validate(nested)]
    pub git: GitSettings,
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

fn default_target_type() -> String {
    "warehouse".to_string()
}

fn default_secret_store_type() -> String {
    "env".to_string()
}

/// Complete application settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentSettings>,
}

impl Settings {
    /// Load settings from the given file, or `$HOME/.groundwork.yaml`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(true))
            .add_source(Environment::with_prefix("GROUNDWORK").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse settings from YAML text
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Yaml))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Select and validate one environment
    pub fn environment(&self, name: &str) -> Result<EnvironmentSettings, ConfigError> {
        let env = self
            .environments
            .get(name)
            .or_else(|| self.environments.get(&name.to_lowercase()))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))?;

        env.validate()
            .map_err(|e| ConfigError::InvalidValue(format!("environment {}: {}", name, e)))?;

        Ok(env)
    }
}

fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var("HOME")
        .map_err(|_| ConfigError::MissingVar("HOME".to_string()))?;
    Ok(Path::new(&home).join(DEFAULT_CONFIG_FILE))
}

/// Connection parameters extracted from a target url
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub dbname: String,
}

impl TargetSettings {
    /// Parse the target url (`postgres://user@host:port/db`)
    pub fn connection_params(&self) -> Result<ConnectionParams, ConfigError> {
        let parsed = url::Url::parse(&self.url).map_err(|_| {
            ConfigError::InvalidValue("Invalid target url format (expected scheme://...)".to_string())
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in target url".to_string()))?
            .to_string();

        let port = parsed.port().unwrap_or(5432);

        let user = if !self.user.is_empty() {
            self.user.clone()
        } else if !parsed.username().is_empty() {
            parsed.username().to_string()
        } else {
            return Err(ConfigError::MissingVar("target.user".to_string()));
        };

        let dbname = match parsed.path().trim_start_matches('/') {
            "" => self.database.clone(),
            db => db.to_string(),
        };

        Ok(ConnectionParams {
            host,
            port,
            user,
            dbname,
        })
    }
}
