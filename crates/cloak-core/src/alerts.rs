//! Operational alert path.
//!
//! Decryption failures and vault corruption may mean tampering or a key
//! mismatch, and an audit write that failed after a committed mask needs
//! reconciliation. Both leave the normal error flow through an [`AlertSink`].

use std::sync::Mutex;

use serde::Serialize;

use cloak_shared::{Pseudonym, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    DecryptionFailure,
    VaultCorruption,
    /// A masked identity points at a vault id that does not exist.
    VaultEntryMissing,
    /// The operation committed but its audit entry was not written.
    AuditReconciliation,
}

impl AlertKind {
    pub fn is_security(&self) -> bool {
        !matches!(self, Self::AuditReconciliation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub subject_user_id: Option<UserId>,
    pub pseudonym: Option<Pseudonym>,
    pub vault_id: Option<String>,
    pub detail: String,
}

pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
}

/// Emits alerts as `tracing` events on dedicated targets so log routing can
/// page on them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: Alert) {
        let user_id = alert.subject_user_id.map(|u| u.0);
        let pseudonym = alert.pseudonym.as_ref().map(|p| p.as_str());
        if alert.kind.is_security() {
            tracing::error!(
                target: "security",
                kind = ?alert.kind,
                user_id,
                pseudonym,
                vault_id = alert.vault_id.as_deref(),
                detail = %alert.detail,
                "security alert"
            );
        } else {
            tracing::warn!(
                target: "reconciliation",
                kind = ?alert.kind,
                user_id,
                pseudonym,
                detail = %alert.detail,
                "audit reconciliation needed"
            );
        }
    }
}

/// Keeps alerts in memory. Used by tests and by embedders that poll.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AlertSink for MemoryAlertSink {
    fn raise(&self, alert: Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(alert);
    }
}
