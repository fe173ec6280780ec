use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::{AAD_CONTEXT_IDENTITY, AAD_CONTEXT_VAULT, NONCE_SIZE, TAG_SIZE};
use crate::error::CryptoError;
use crate::pii::PiiField;

pub type SymmetricKey = [u8; 32];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Ciphertext with its nonce and detached Poly1305 tag.
///
/// Serialized with base64 strings so it can sit inside JSON payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
}

// Every call draws a fresh nonce, so equal plaintexts never produce equal output.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<EncryptedField, CryptoError> {
    encrypt_with_aad(key, plaintext, &[])
}

pub fn encrypt_with_aad(
    key: &SymmetricKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<EncryptedField, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let mut sealed = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)?;

    // chacha20poly1305 appends the tag to the ciphertext
    let tag = sealed.split_off(sealed.len() - TAG_SIZE);

    Ok(EncryptedField {
        ciphertext: sealed,
        iv: nonce_bytes.to_vec(),
        tag,
    })
}

pub fn decrypt(key: &SymmetricKey, field: &EncryptedField) -> Result<Vec<u8>, CryptoError> {
    decrypt_with_aad(key, field, &[])
}

pub fn decrypt_with_aad(
    key: &SymmetricKey,
    field: &EncryptedField,
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if field.iv.len() != NONCE_SIZE {
        return Err(CryptoError::MalformedField(format!(
            "expected {NONCE_SIZE}-byte iv, got {}",
            field.iv.len()
        )));
    }
    if field.tag.len() != TAG_SIZE {
        return Err(CryptoError::MalformedField(format!(
            "expected {TAG_SIZE}-byte tag, got {}",
            field.tag.len()
        )));
    }

    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(&field.iv);

    let mut combined = Vec::with_capacity(field.ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(&field.ciphertext);
    combined.extend_from_slice(&field.tag);

    cipher
        .decrypt(nonce, Payload { msg: &combined, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

// ---------------------------------------------------------------------------
// Envelope engine
// ---------------------------------------------------------------------------

/// Holds the two independent keys and knows which one guards which boundary.
///
/// The identity key seals individual PII fields; the vault key seals the whole
/// vault payload built from those already-sealed fields. Each layer binds its
/// own associated data (field name, vault id) so ciphertexts cannot be swapped
/// between slots.
#[derive(Clone)]
pub struct EnvelopeCrypto {
    identity_key: SymmetricKey,
    vault_key: SymmetricKey,
}

impl EnvelopeCrypto {
    pub fn new(identity_key: SymmetricKey, vault_key: SymmetricKey) -> Result<Self, CryptoError> {
        if identity_key == vault_key {
            return Err(CryptoError::KeysNotIndependent);
        }
        Ok(Self {
            identity_key,
            vault_key,
        })
    }

    pub fn seal_identity(
        &self,
        field: PiiField,
        plaintext: &str,
    ) -> Result<EncryptedField, CryptoError> {
        encrypt_with_aad(
            &self.identity_key,
            plaintext.as_bytes(),
            &identity_aad(field),
        )
    }

    pub fn open_identity(
        &self,
        field: PiiField,
        sealed: &EncryptedField,
    ) -> Result<String, CryptoError> {
        let bytes = decrypt_with_aad(&self.identity_key, sealed, &identity_aad(field))?;
        String::from_utf8(bytes).map_err(|_| CryptoError::InvalidUtf8)
    }

    pub fn seal_vault(&self, vault_id: &str, payload: &[u8]) -> Result<EncryptedField, CryptoError> {
        encrypt_with_aad(&self.vault_key, payload, &vault_aad(vault_id))
    }

    pub fn open_vault(
        &self,
        vault_id: &str,
        sealed: &EncryptedField,
    ) -> Result<Vec<u8>, CryptoError> {
        decrypt_with_aad(&self.vault_key, sealed, &vault_aad(vault_id))
    }
}

impl fmt::Debug for EnvelopeCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCrypto")
            .field("identity_key", &"<redacted>")
            .field("vault_key", &"<redacted>")
            .finish()
    }
}

fn identity_aad(field: PiiField) -> Vec<u8> {
    format!("{AAD_CONTEXT_IDENTITY}:{}", field.as_str()).into_bytes()
}

fn vault_aad(vault_id: &str) -> Vec<u8> {
    format!("{AAD_CONTEXT_VAULT}:{vault_id}").into_bytes()
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
