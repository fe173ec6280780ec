//! # cloak-store
//!
//! Primary relational storage for Cloak, backed by SQLite.
//!
//! Holds identity records, class membership and mentorship edges keyed by
//! pseudonym, and the append-only audit log. Vault entries are deliberately
//! not stored here. The crate exposes a synchronous `Database` handle that
//! wraps a `rusqlite::Connection` and provides typed helpers for every table.

pub mod audit;
pub mod classes;
pub mod database;
pub mod identities;
pub mod migrations;
pub mod models;
pub mod relationships;

mod error;
mod sql;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
