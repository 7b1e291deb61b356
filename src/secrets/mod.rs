//! Secret retrieval
//!
//! Rendering, repository credentials and the target connection all resolve
//! secrets through the [`SecretStore`] capability.

mod env;

pub use env::EnvironmentSecretStore;

use crate::config::SecretStoreSettings;
use crate::error::{AppError, AppResult};

/// Read-only secret lookup
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, key: &str) -> AppResult<String>;
}

/// Open the secret store named in the environment settings
pub fn open_secret_store(
    store_type: &str,
    settings: &SecretStoreSettings,
) -> AppResult<Box<dyn SecretStore>> {
    match store_type.trim().to_lowercase().as_str() {
        // Key vault secrets are projected into the process environment.
        "env" | "environment" | "keyvault" => {
            Ok(Box::new(EnvironmentSecretStore::new(&settings.namespace)))
        }
        other => Err(AppError::InvalidSecretStoreType(other.to_string())),
    }
}
