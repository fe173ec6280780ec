use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Tag did not verify: tampered ciphertext or wrong key.
    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Malformed encrypted field: {0}")]
    MalformedField(String),

    #[error("Identity key and vault key must differ")]
    KeysNotIndependent,

    #[error("Decrypted data is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PseudonymError {
    #[error("Invalid pseudonym format")]
    InvalidFormat,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
