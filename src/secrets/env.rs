//! Environment-variable backed secret store

use super::SecretStore;
use crate::error::{AppError, AppResult};
use tracing::debug;

/// Resolves `key` from the variable `<NAMESPACE>_<KEY>`
#[derive(Debug, Clone)]
pub struct EnvironmentSecretStore {
    namespace: String,
}

impl EnvironmentSecretStore {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    /// Environment variable name holding `key`
    pub fn variable_name(&self, key: &str) -> String {
        let raw = if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}_{}", self.namespace, key)
        };

        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }
}

impl SecretStore for EnvironmentSecretStore {
    fn get_secret(&self, key: &str) -> AppResult<String> {
        let name = self.variable_name(key);
        debug!("Resolving secret {} from {}", key, name);
        std::env::var(&name).map_err(|_| AppError::SecretNotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_name_normalisation() {
        let store = EnvironmentSecretStore::new("groundwork");
        assert_eq!(store.variable_name("loader-password"), "GROUNDWORK_LOADER_PASSWORD");
    }

    #[test]
    fn test_get_secret_from_environment() {
        let store = EnvironmentSecretStore::new("GW_SECRET_TEST");
        std::env::set_var("GW_SECRET_TEST_API_KEY", "s3cr3t");

        assert_eq!(store.get_secret("api.key").unwrap(), "s3cr3t");
        assert!(matches!(
            store.get_secret("absent"),
            Err(AppError::SecretNotFound(_))
        ));
    }
}
