//! Core configuration, validated once at process start.
//!
//! The two symmetric keys are mandatory: a process that cannot build its
//! [`EnvelopeCrypto`] must not start. Everything else has a default suitable
//! for local development.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use cloak_shared::constants::{
    DEFAULT_BULK_GENERATE_LIMIT, DEFAULT_PSEUDONYM_ATTEMPTS, SYMMETRIC_KEY_SIZE,
};
use cloak_shared::{EnvelopeCrypto, SymmetricKey};

pub const ENV_IDENTITY_KEY: &str = "CLOAK_IDENTITY_KEY";
pub const ENV_VAULT_KEY: &str = "CLOAK_VAULT_KEY";
pub const ENV_DATABASE_PATH: &str = "CLOAK_DATABASE_PATH";
pub const ENV_VAULT_PATH: &str = "CLOAK_VAULT_PATH";
pub const ENV_PSEUDONYM_ATTEMPTS: &str = "CLOAK_PSEUDONYM_ATTEMPTS";
pub const ENV_BULK_GENERATE_LIMIT: &str = "CLOAK_BULK_GENERATE_LIMIT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    MissingKey(&'static str),

    #[error("Invalid {name}: {reason}")]
    InvalidKey { name: &'static str, reason: String },

    #[error("CLOAK_IDENTITY_KEY and CLOAK_VAULT_KEY must be different keys")]
    KeysNotIndependent,
}

/// Core configuration.
#[derive(Clone)]
pub struct CloakConfig {
    /// Seals individual PII fields.
    /// Env: `CLOAK_IDENTITY_KEY` (64 hex chars, required)
    pub identity_key: SymmetricKey,

    /// Seals the vault payload.
    /// Env: `CLOAK_VAULT_KEY` (64 hex chars, required)
    pub vault_key: SymmetricKey,

    /// SQLite file for identity records, edges and audit.
    /// Env: `CLOAK_DATABASE_PATH`
    /// Default: `./cloak.db`
    pub database_path: PathBuf,

    /// Directory of the file-backed identity vault.
    /// Env: `CLOAK_VAULT_PATH`
    /// Default: `./vault`
    pub vault_path: PathBuf,

    /// Pseudonym collision retry budget.
    /// Env: `CLOAK_PSEUDONYM_ATTEMPTS`
    /// Default: `10`
    pub pseudonym_attempts: u32,

    /// Largest accepted bulk pseudonym request.
    /// Env: `CLOAK_BULK_GENERATE_LIMIT`
    /// Default: `100`
    pub bulk_generate_limit: usize,
}

impl CloakConfig {
    /// Config with the given keys and default everything else.
    pub fn with_keys(identity_key: SymmetricKey, vault_key: SymmetricKey) -> Self {
        Self {
            identity_key,
            vault_key,
            database_path: PathBuf::from("./cloak.db"),
            vault_path: PathBuf::from("./vault"),
            pseudonym_attempts: DEFAULT_PSEUDONYM_ATTEMPTS,
            bulk_generate_limit: DEFAULT_BULK_GENERATE_LIMIT,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from any name → value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let identity_key = required_key(&lookup, ENV_IDENTITY_KEY)?;
        let vault_key = required_key(&lookup, ENV_VAULT_KEY)?;
        if identity_key == vault_key {
            return Err(ConfigError::KeysNotIndependent);
        }

        let mut config = Self::with_keys(identity_key, vault_key);

        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup(ENV_VAULT_PATH) {
            config.vault_path = PathBuf::from(path);
        }

        if let Some(val) = lookup(ENV_PSEUDONYM_ATTEMPTS) {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.pseudonym_attempts = n,
                _ => tracing::warn!(
                    value = %val,
                    "Invalid CLOAK_PSEUDONYM_ATTEMPTS, using default"
                ),
            }
        }

        if let Some(val) = lookup(ENV_BULK_GENERATE_LIMIT) {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.bulk_generate_limit = n,
                _ => tracing::warn!(
                    value = %val,
                    "Invalid CLOAK_BULK_GENERATE_LIMIT, using default"
                ),
            }
        }

        Ok(config)
    }

    /// Build the crypto engine from the two keys.
    pub fn envelope(&self) -> Result<EnvelopeCrypto, ConfigError> {
        EnvelopeCrypto::new(self.identity_key, self.vault_key)
            .map_err(|_| ConfigError::KeysNotIndependent)
    }
}

impl fmt::Debug for CloakConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloakConfig")
            .field("identity_key", &"<redacted>")
            .field("vault_key", &"<redacted>")
            .field("database_path", &self.database_path)
            .field("vault_path", &self.vault_path)
            .field("pseudonym_attempts", &self.pseudonym_attempts)
            .field("bulk_generate_limit", &self.bulk_generate_limit)
            .finish()
    }
}

fn required_key<F>(lookup: &F, name: &'static str) -> Result<SymmetricKey, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingKey(name))?;
    parse_hex_key(name, &raw)
}

/// Parse a 64-character hex string into a 32-byte key.
fn parse_hex_key(name: &'static str, hex_str: &str) -> Result<SymmetricKey, ConfigError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|e| ConfigError::InvalidKey {
        name,
        reason: e.to_string(),
    })?;

    if bytes.len() != SYMMETRIC_KEY_SIZE {
        return Err(ConfigError::InvalidKey {
            name,
            reason: format!(
                "expected {} hex chars, got {}",
                SYMMETRIC_KEY_SIZE * 2,
                hex_str.trim().len()
            ),
        });
    }

    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}
