//! Unmasking orchestrator. Never mutates the identity record.
//!
//! Data leaves this module only after an UNMASK audit entry has been written.
//! A decryption or corruption failure escalates to the alert sink and leaves
//! an UNMASK_FAILED entry for forensics; it never produces an UNMASK entry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use cloak_shared::{AuditKind, CallerContext, IdentityPii, Pseudonym, UserId, VaultPayload};
use cloak_store::{IdentityRecord, NewAuditEntry, StoreError};

use crate::alerts::{Alert, AlertKind};
use crate::audit::{record_best_effort, record_required};
use crate::error::CoreError;
use crate::gate::{authorize, Operation, Tier};
use crate::service::IdentityCore;
use crate::vault::{VaultError, VaultRecord};

/// Original identity recovered from the vault. `Debug` keeps PII redacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevealedIdentity {
    pub user_id: UserId,
    pub pseudonym: Pseudonym,
    pub masked_at: DateTime<Utc>,
    pub pii: IdentityPii,
}

impl IdentityCore {
    /// Recover the real identity behind `pseudonym`. Super-admin tier, and a
    /// non-empty reason is mandatory. Each call is audited independently.
    pub async fn unmask_identity(
        &self,
        caller: &CallerContext,
        pseudonym: &str,
        reason: &str,
    ) -> Result<RevealedIdentity, CoreError> {
        authorize(caller, Operation::UnmaskIdentity, Tier::SuperAdmin)?;
        let reason = required_reason(reason)?;
        let pseudonym = Pseudonym::parse(pseudonym)?;

        let record = {
            let db = self.ctx.db.lock().await;
            db.find_by_pseudonym(&pseudonym).map_err(|e| match e {
                StoreError::NotFound => CoreError::not_found("pseudonym"),
                other => other.into(),
            })?
        };

        let revealed = match self.reveal(&record).await {
            Ok(r) => r,
            Err(e) => {
                if e.is_security_event() {
                    self.record_failed_unmask(caller, &record, &reason, &e).await;
                }
                return Err(e);
            }
        };

        {
            let db = self.ctx.db.lock().await;
            record_required(
                &db,
                &NewAuditEntry::new(AuditKind::Unmask, caller.actor_label())
                    .subject(Some(record.id), Some(pseudonym.clone()))
                    .reason(Some(reason)),
            )?;
        }

        tracing::info!(
            target: "security",
            user_id = record.id.0,
            pseudonym = %pseudonym,
            actor = %caller.actor_label(),
            "identity unmasked"
        );
        Ok(revealed)
    }

    /// Unmask every masked identity. Super-admin tier.
    ///
    /// All entries are opened before any is audited, so a single failure
    /// aborts the export with nothing returned.
    pub async fn export_masked_identities(
        &self,
        caller: &CallerContext,
        reason: &str,
    ) -> Result<Vec<RevealedIdentity>, CoreError> {
        authorize(caller, Operation::ExportIdentities, Tier::SuperAdmin)?;
        let reason = required_reason(reason)?;

        let records = {
            let db = self.ctx.db.lock().await;
            db.list_masked_identities()?
        };

        let mut revealed = Vec::with_capacity(records.len());
        for record in &records {
            match self.reveal(record).await {
                Ok(r) => revealed.push(r),
                Err(e) => {
                    if e.is_security_event() {
                        self.record_failed_unmask(caller, record, &reason, &e).await;
                    }
                    return Err(e);
                }
            }
        }

        {
            let db = self.ctx.db.lock().await;
            for r in &revealed {
                record_required(
                    &db,
                    &NewAuditEntry::new(AuditKind::Unmask, caller.actor_label())
                        .subject(Some(r.user_id), Some(r.pseudonym.clone()))
                        .reason(Some(reason.clone()))
                        .details(json!({ "export": true })),
                )?;
            }
        }

        tracing::info!(
            target: "security",
            count = revealed.len(),
            actor = %caller.actor_label(),
            "masked identities exported"
        );
        Ok(revealed)
    }

    /// Retrieve and open both layers of a masked record's vault entry.
    pub(crate) async fn reveal(&self, record: &IdentityRecord) -> Result<RevealedIdentity, CoreError> {
        let vault_id = match (&record.vault_ref, record.masked) {
            (Some(id), true) => id.as_str(),
            _ => return Err(CoreError::NotMasked),
        };

        let raw = match self.ctx.vault.retrieve(vault_id).await {
            Ok(raw) => raw,
            Err(VaultError::NotFound(_)) => {
                self.raise(AlertKind::VaultEntryMissing, record, "vault entry missing".into());
                return Err(CoreError::not_found("vault entry"));
            }
            Err(e) => return Err(self.escalate(record, e.into())),
        };

        let stored = VaultRecord::decode(vault_id, &raw).map_err(|e| self.escalate(record, e.into()))?;
        let payload_bytes = self
            .ctx
            .crypto
            .open_vault(vault_id, &stored.sealed)
            .map_err(|e| self.escalate(record, e.into()))?;
        let payload: VaultPayload = serde_json::from_slice(&payload_bytes)
            .map_err(|e| self.escalate(record, CoreError::VaultCorruption(e.to_string())))?;

        if payload.user_id != record.id || record.pseudonym.as_ref() != Some(&payload.pseudonym) {
            return Err(self.escalate(
                record,
                CoreError::VaultCorruption("payload does not belong to this identity".into()),
            ));
        }

        let pii = payload
            .pii
            .open(&self.ctx.crypto)
            .map_err(|e| self.escalate(record, e.into()))?;

        Ok(RevealedIdentity {
            user_id: record.id,
            pseudonym: payload.pseudonym,
            masked_at: payload.masked_at,
            pii,
        })
    }

    /// Route security-relevant failures to the alert sink; pass others through.
    fn escalate(&self, record: &IdentityRecord, err: CoreError) -> CoreError {
        let kind = match &err {
            CoreError::DecryptionFailure => AlertKind::DecryptionFailure,
            CoreError::VaultCorruption(_) => AlertKind::VaultCorruption,
            _ => return err,
        };
        let detail = match &err {
            CoreError::VaultCorruption(detail) => detail.clone(),
            other => other.to_string(),
        };
        self.raise(kind, record, detail);
        err
    }

    fn raise(&self, kind: AlertKind, record: &IdentityRecord, detail: String) {
        self.ctx.alerts.raise(Alert {
            kind,
            subject_user_id: Some(record.id),
            pseudonym: record.pseudonym.clone(),
            vault_id: record.vault_ref.clone(),
            detail,
        });
    }

    async fn record_failed_unmask(
        &self,
        caller: &CallerContext,
        record: &IdentityRecord,
        reason: &str,
        err: &CoreError,
    ) {
        let db = self.ctx.db.lock().await;
        record_best_effort(
            &db,
            self.ctx.alerts.as_ref(),
            &NewAuditEntry::new(AuditKind::UnmaskFailed, caller.actor_label())
                .subject(Some(record.id), record.pseudonym.clone())
                .reason(Some(reason.to_string()))
                .details(json!({ "error": err.kind() })),
        );
    }
}

fn required_reason(reason: &str) -> Result<String, CoreError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(CoreError::Validation("a reason is required".to_string()));
    }
    Ok(reason.to_string())
}
