//! Plaintext PII, its field-sealed form, and the vault payload that wraps it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::VAULT_PAYLOAD_VERSION;
use crate::crypto::{EncryptedField, EnvelopeCrypto};
use crate::error::CryptoError;
use crate::pseudonym::Pseudonym;
use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiField {
    Username,
    Email,
    Phone,
    RealName,
    Address,
}

impl PiiField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::RealName => "real_name",
            Self::Address => "address",
        }
    }
}

/// Real identity of a user. `Debug` never prints the values.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPii {
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub real_name: Option<String>,
    pub address: Option<String>,
}

impl fmt::Debug for IdentityPii {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityPii")
            .field("username", &"<pii>")
            .field("email", &"<pii>")
            .field("phone", &self.phone.as_ref().map(|_| "<pii>"))
            .field("real_name", &self.real_name.as_ref().map(|_| "<pii>"))
            .field("address", &self.address.as_ref().map(|_| "<pii>"))
            .finish()
    }
}

/// Each PII field sealed separately under the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPii {
    pub username: EncryptedField,
    pub email: EncryptedField,
    pub phone: Option<EncryptedField>,
    pub real_name: Option<EncryptedField>,
    pub address: Option<EncryptedField>,
}

impl SealedPii {
    pub fn seal(crypto: &EnvelopeCrypto, pii: &IdentityPii) -> Result<Self, CryptoError> {
        let seal_opt = |field: PiiField, value: &Option<String>| {
            value
                .as_deref()
                .map(|v| crypto.seal_identity(field, v))
                .transpose()
        };

        Ok(Self {
            username: crypto.seal_identity(PiiField::Username, &pii.username)?,
            email: crypto.seal_identity(PiiField::Email, &pii.email)?,
            phone: seal_opt(PiiField::Phone, &pii.phone)?,
            real_name: seal_opt(PiiField::RealName, &pii.real_name)?,
            address: seal_opt(PiiField::Address, &pii.address)?,
        })
    }

    /// Open every field. Any single failure fails the whole call, so no
    /// partially decrypted identity is ever produced.
    pub fn open(&self, crypto: &EnvelopeCrypto) -> Result<IdentityPii, CryptoError> {
        let open_opt = |field: PiiField, value: &Option<EncryptedField>| {
            value
                .as_ref()
                .map(|v| crypto.open_identity(field, v))
                .transpose()
        };

        Ok(IdentityPii {
            username: crypto.open_identity(PiiField::Username, &self.username)?,
            email: crypto.open_identity(PiiField::Email, &self.email)?,
            phone: open_opt(PiiField::Phone, &self.phone)?,
            real_name: open_opt(PiiField::RealName, &self.real_name)?,
            address: open_opt(PiiField::Address, &self.address)?,
        })
    }
}

/// What gets sealed under the vault key and written to the identity vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPayload {
    pub version: u16,
    pub user_id: UserId,
    pub pseudonym: Pseudonym,
    pub masked_at: DateTime<Utc>,
    pub pii: SealedPii,
}

impl VaultPayload {
    pub fn new(user_id: UserId, pseudonym: Pseudonym, pii: SealedPii) -> Self {
        Self {
            version: VAULT_PAYLOAD_VERSION,
            user_id,
            pseudonym,
            masked_at: Utc::now(),
            pii,
        }
    }
}
