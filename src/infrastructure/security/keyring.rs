use crate::domain::error::{AppError, Result};
use keyring::Entry;

/// Keychain account name under which secrets are stored.
pub const KEYCHAIN_USER: &str = "wardroute";

pub struct KeyringManager {
    user: String,
}

impl KeyringManager {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
        }
    }

    /// Entries are keyed as (service = secret name, user = `KEYCHAIN_USER`).
    pub fn get_secret(&self, name: &str) -> Result<String> {
        let entry = Entry::new(name, &self.user)
            .map_err(|e| AppError::SecurityError(format!("Failed to create entry: {}", e)))?;

        entry
            .get_password()
            .map_err(|e| AppError::SecurityError(format!("Failed to get password: {}", e)))
    }
}

/// Resolve a secret reference
/// Format: "env:DB_PASSWORD" -> reads from the DB_PASSWORD env var
/// Format: "keychain:key_name" -> reads from OS keychain
/// Format: "plain:password" -> returns password directly (development only)
/// Anything else is taken as the secret itself.
pub fn resolve_secret(reference: &str) -> Result<String> {
    if let Some(env_key) = reference.strip_prefix("env:") {
        std::env::var(env_key).map_err(|_| {
            AppError::ConfigError(format!(
                "Environment variable '{}' not found for secret",
                env_key
            ))
        })
    } else if let Some(key_name) = reference.strip_prefix("keychain:") {
        KeyringManager::new(KEYCHAIN_USER).get_secret(key_name)
    } else if let Some(plain) = reference.strip_prefix("plain:") {
        Ok(plain.to_string())
    } else {
        Ok(reference.to_string())
    }
}
