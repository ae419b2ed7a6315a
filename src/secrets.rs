//! Credential resolution.
//!
//! Tasks never hold a process-wide credential. Each task invocation asks a
//! [`SecretStore`] for the named secret it needs, so the lifetime of a key is
//! the lifetime of the run that resolved it.

use secrecy::SecretString;
use std::collections::HashMap;
use thiserror::Error;

/// Environment variable prefix used by [`EnvSecretStore`].
pub const DEFAULT_SECRET_PREFIX: &str = "FORECAST_SECRET_";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),
    #[error("Secret '{0}' is empty")]
    Empty(String),
}

/// Resolves named secrets at task run time.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Result<SecretString, SecretError>;
}

/// Reads secrets from environment variables named `<prefix><NAME>`.
///
/// `EIAApiToken` with the default prefix resolves `FORECAST_SECRET_EIAAPITOKEN`.
#[derive(Debug, Clone)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_SECRET_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        EnvSecretStore {
            prefix: prefix.into(),
        }
    }

    pub fn variable_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name.to_uppercase())
    }
}

impl Default for EnvSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, name: &str) -> Result<SecretString, SecretError> {
        let var = self.variable_name(name);
        let value = std::env::var(&var).map_err(|_| SecretError::NotFound(var.clone()))?;
        if value.trim().is_empty() {
            return Err(SecretError::Empty(var));
        }
        Ok(SecretString::from(value))
    }
}

/// Fixed secrets held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    values: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn get(&self, name: &str) -> Result<SecretString, SecretError> {
        self.values
            .get(name)
            .map(|v| SecretString::from(v.clone()))
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}
