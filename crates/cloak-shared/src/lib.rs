//! # cloak-shared
//!
//! Types and primitives shared by every Cloak crate: identifiers, roles and
//! membership stages, the envelope crypto engine, pseudonym generation, and
//! the sealed PII payload that ends up in the identity vault.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod pii;
pub mod pseudonym;
pub mod types;

pub use crypto::{EncryptedField, EnvelopeCrypto, SymmetricKey};
pub use error::{CryptoError, ParseEnumError, PseudonymError};
pub use pii::{IdentityPii, PiiField, SealedPii, VaultPayload};
pub use pseudonym::{derive_avatar, AvatarDescriptor, GenerateError, Pseudonym, PseudonymGenerator};
pub use types::{AuditKind, CallerContext, MembershipStage, RelationshipKind, Role, UserId};
