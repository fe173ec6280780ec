/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Fixed prefix of every pseudonym, e.g. `PN-7K2Q9XA4TB`
pub const PSEUDONYM_PREFIX: &str = "PN-";

/// Number of random characters after the prefix
pub const PSEUDONYM_BODY_LEN: usize = 10;

/// Pseudonym body alphabet. Uppercase and digits without 0/O/1/I.
pub const PSEUDONYM_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Collision retries before pseudonym generation gives up
pub const DEFAULT_PSEUDONYM_ATTEMPTS: u32 = 10;

/// Upper bound for a single bulk pseudonym generation request
pub const DEFAULT_BULK_GENERATE_LIMIT: usize = 100;

/// Prefix of the public username placeholder written at masking time
pub const PLACEHOLDER_USERNAME_PREFIX: &str = "User_";

/// Domain of the public email placeholder written at masking time
pub const PLACEHOLDER_EMAIL_DOMAIN: &str = "masked.invalid";

/// Version tag of the serialized vault payload
pub const VAULT_PAYLOAD_VERSION: u16 = 1;

/// Associated-data contexts, one per trust boundary
pub const AAD_CONTEXT_IDENTITY: &str = "cloak-identity-v1";
pub const AAD_CONTEXT_VAULT: &str = "cloak-vault-v1";

/// Key derivation context for avatar descriptors (BLAKE3)
pub const KDF_CONTEXT_AVATAR: &str = "cloak-avatar-v1";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
