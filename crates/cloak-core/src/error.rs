use thiserror::Error;

use cloak_shared::{CryptoError, PseudonymError};
use cloak_store::StoreError;

use crate::config::ConfigError;
use crate::vault::VaultError;

/// Errors returned to callers of the identity core.
///
/// Messages are safe to show to the caller: no key material, no plaintext PII
/// and no storage internals. `Internal` keeps its detail for logging only.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Identity is already masked")]
    AlreadyMasked,

    #[error("Identity is not masked")]
    NotMasked,

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Pseudonym generation exhausted after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Vault entry is corrupt")]
    VaultCorruption(String),

    #[error("Mentee already has an active mentor")]
    AlreadyAssigned,

    #[error("Validation error: {0}")]
    Validation(String),

    /// The audit record an operation depends on could not be written.
    #[error("Audit trail unavailable")]
    AuditUnavailable,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error")]
    Internal(String),
}

impl CoreError {
    /// Stable, machine-readable kind for the web layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyMasked => "already_masked",
            Self::NotMasked => "not_masked",
            Self::NotEligible(_) => "not_eligible",
            Self::Unauthorized => "unauthorized",
            Self::GenerationExhausted { .. } => "generation_exhausted",
            Self::DecryptionFailure => "decryption_failure",
            Self::VaultCorruption(_) => "vault_corruption",
            Self::AlreadyAssigned => "already_assigned",
            Self::Validation(_) => "validation_error",
            Self::AuditUnavailable => "audit_unavailable",
            Self::Config(_) => "config_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Errors that may indicate tampering or a key mismatch.
    pub fn is_security_event(&self) -> bool {
        matches!(self, Self::DecryptionFailure | Self::VaultCorruption(_))
    }

    pub(crate) fn not_found(what: &str) -> Self {
        Self::NotFound(what.to_string())
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CoreError::NotFound("record".to_string()),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<VaultError> for CoreError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::NotFound(_) => CoreError::NotFound("vault entry".to_string()),
            VaultError::Corrupt(detail) => CoreError::VaultCorruption(detail),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<CryptoError> for CoreError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed | CryptoError::InvalidUtf8 => CoreError::DecryptionFailure,
            CryptoError::MalformedField(detail) => CoreError::VaultCorruption(detail),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<PseudonymError> for CoreError {
    fn from(_: PseudonymError) -> Self {
        CoreError::Validation("malformed pseudonym".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_detail_not_displayed() {
        let err = CoreError::Internal("disk I/O error at /srv/secret".into());
        assert_eq!(err.to_string(), "Internal error");
        assert_eq!(err.kind(), "internal_error");
    }

    #[test]
    fn test_security_events() {
        assert!(CoreError::DecryptionFailure.is_security_event());
        assert!(CoreError::VaultCorruption("x".into()).is_security_event());
        assert!(!CoreError::Unauthorized.is_security_event());
    }

    #[test]
    fn test_crypto_mapping() {
        assert!(matches!(
            CoreError::from(CryptoError::DecryptionFailed),
            CoreError::DecryptionFailure
        ));
        assert!(matches!(
            CoreError::from(CryptoError::MalformedField("iv".into())),
            CoreError::VaultCorruption(_)
        ));
    }

    #[test]
    fn test_store_not_found_mapping() {
        assert!(matches!(
            CoreError::from(StoreError::NotFound),
            CoreError::NotFound(_)
        ));
        assert!(matches!(
            CoreError::from(StoreError::Conflict("x".into())),
            CoreError::Internal(_)
        ));
    }
}
