//! # cloak-core
//!
//! Pseudonymous identity masking. Orchestrates the pseudonym generator, the
//! envelope crypto engine, the identity vault, the relationship registry and
//! the audit trail behind a single authorization gate.
//!
//! This crate knows nothing about HTTP. Callers pass an authenticated
//! [`CallerContext`](cloak_shared::CallerContext) into every operation on
//! [`IdentityCore`] and map [`CoreError`] to their own transport.

pub mod alerts;
pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod masking;
pub mod profile;
pub mod pseudonyms;
pub mod registry;
pub mod service;
pub mod unmasking;
pub mod vault;

#[cfg(test)]
mod testkit;

pub use alerts::{Alert, AlertKind, AlertSink, MemoryAlertSink, TracingAlertSink};
pub use config::{CloakConfig, ConfigError};
pub use context::CoreContext;
pub use error::CoreError;
pub use masking::{MaskOutcome, MaskRequest};
pub use profile::{IdentityStatus, PublicProfile};
pub use registry::Reassignment;
pub use service::IdentityCore;
pub use unmasking::RevealedIdentity;
pub use vault::{FsVault, MemoryVault, VaultError, VaultRecord, VaultStore};
