//! Masking orchestrator: Unmasked → Masked, one way.
//!
//! The vault entry is written before the relational commit, and the commit is
//! a compare-and-set on the identity row. If the commit loses a race or
//! fails, the fresh vault entry is purged again so that a masked identity
//! always has exactly one vault entry and an unmasked one has none.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use cloak_shared::{
    derive_avatar, AuditKind, AvatarDescriptor, CallerContext, IdentityPii, Pseudonym, SealedPii,
    UserId, VaultPayload,
};
use cloak_store::{
    Database, IdentityRecord, MaskCommit, MaskCommitOutcome, MaskMentor, NewAuditEntry, StoreError,
};

use crate::audit::record_best_effort;
use crate::error::CoreError;
use crate::gate::{authorize, Operation, Tier};
use crate::pseudonyms::generate_unique;
use crate::service::{load_identity, IdentityCore};
use crate::vault::{new_vault_id, VaultRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskRequest {
    pub user_id: UserId,
    pub mentor: Option<Pseudonym>,
    pub class_id: Option<String>,
    pub reason: Option<String>,
}

impl MaskRequest {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            mentor: None,
            class_id: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskOutcome {
    pub user_id: UserId,
    pub pseudonym: Pseudonym,
    pub avatar: AvatarDescriptor,
    pub masked_at: DateTime<Utc>,
}

impl IdentityCore {
    /// Seal a user's real identity in the vault and replace it with a fresh
    /// pseudonym. Admin tier.
    pub async fn mask_identity(
        &self,
        caller: &CallerContext,
        req: MaskRequest,
    ) -> Result<MaskOutcome, CoreError> {
        authorize(caller, Operation::MaskIdentity, Tier::Admin)?;

        let (record, pseudonym) = {
            let db = self.ctx.db.lock().await;
            let record = load_identity(&db, req.user_id)?;
            check_maskable(&record)?;
            if let Some(mentor) = &req.mentor {
                check_mentor(&db, mentor)?;
            }
            if let Some(class_id) = &req.class_id {
                db.get_class(class_id).map_err(|e| match e {
                    StoreError::NotFound => CoreError::not_found("class"),
                    other => other.into(),
                })?;
            }
            let pseudonym = generate_unique(&self.ctx.generator, &db, &HashSet::new())?;
            (record, pseudonym)
        };

        let avatar = derive_avatar(&pseudonym);
        let pii = IdentityPii {
            username: record.username,
            email: record.email,
            phone: record.phone,
            real_name: record.real_name,
            address: record.address,
        };

        let sealed = SealedPii::seal(&self.ctx.crypto, &pii)?;
        let payload = VaultPayload::new(record.id, pseudonym.clone(), sealed);
        let masked_at = payload.masked_at;
        let payload_bytes =
            serde_json::to_vec(&payload).map_err(|e| CoreError::Internal(e.to_string()))?;

        let vault_id = new_vault_id();
        let outer = self.ctx.crypto.seal_vault(&vault_id, &payload_bytes)?;
        let entry = VaultRecord::new(vault_id.clone(), outer).encode()?;
        self.ctx.vault.store(&vault_id, &entry).await?;

        let commit = MaskCommit {
            user_id: record.id,
            pseudonym: pseudonym.clone(),
            vault_ref: vault_id.clone(),
            avatar: avatar.clone(),
            class_id: req.class_id.clone(),
            mentor: req.mentor.clone().map(|mentor| MaskMentor {
                audit: NewAuditEntry::new(AuditKind::AssignMentor, caller.actor_label())
                    .subject(Some(record.id), Some(pseudonym.clone()))
                    .reason(req.reason.clone())
                    .details(json!({ "mentor": mentor.as_str() })),
                mentor,
            }),
            masked_at,
        };

        let committed = {
            let mut db = self.ctx.db.lock().await;
            db.commit_masking(&commit)
        };

        match committed {
            Ok(MaskCommitOutcome::Committed) => {}
            Ok(MaskCommitOutcome::AlreadyMasked) => {
                self.discard_vault_entry(&vault_id).await;
                return Err(CoreError::AlreadyMasked);
            }
            Ok(MaskCommitOutcome::MentorIneligible(reason)) => {
                self.discard_vault_entry(&vault_id).await;
                return Err(CoreError::NotEligible(reason));
            }
            Err(e) => {
                self.discard_vault_entry(&vault_id).await;
                tracing::error!(user_id = record.id.0, error = %e, "masking commit failed");
                return Err(e.into());
            }
        }

        {
            let db = self.ctx.db.lock().await;
            record_best_effort(
                &db,
                self.ctx.alerts.as_ref(),
                &NewAuditEntry::new(AuditKind::Mask, caller.actor_label())
                    .subject(Some(record.id), Some(pseudonym.clone()))
                    .reason(req.reason.clone())
                    .details(json!({
                        "mentor": req.mentor.as_ref().map(|p| p.as_str()),
                        "class_id": req.class_id,
                    })),
            );
        }

        tracing::info!(
            user_id = record.id.0,
            pseudonym = %pseudonym,
            actor = %caller.actor_label(),
            "identity masked"
        );

        Ok(MaskOutcome {
            user_id: record.id,
            pseudonym,
            avatar,
            masked_at,
        })
    }

    /// Remove a vault entry whose masking never committed.
    async fn discard_vault_entry(&self, vault_id: &str) {
        if let Err(e) = self.ctx.vault.purge(vault_id).await {
            tracing::warn!(
                target: "reconciliation",
                vault_id,
                error = %e,
                "orphaned vault entry could not be purged"
            );
        }
    }
}

fn check_maskable(record: &IdentityRecord) -> Result<(), CoreError> {
    if record.masked || record.vault_ref.is_some() {
        return Err(CoreError::AlreadyMasked);
    }
    if !record.membership_stage.is_eligible() {
        return Err(CoreError::NotEligible(format!(
            "membership stage {} cannot be masked",
            record.membership_stage.as_str()
        )));
    }
    Ok(())
}

/// A mentor must already be masked and in good standing.
pub(crate) fn check_mentor(db: &Database, mentor: &Pseudonym) -> Result<IdentityRecord, CoreError> {
    let record = db.find_by_pseudonym(mentor).map_err(|e| match e {
        StoreError::NotFound => CoreError::not_found("mentor"),
        other => other.into(),
    })?;
    if !record.masked {
        return Err(CoreError::NotEligible("mentor is not masked".to_string()));
    }
    if !record.membership_stage.is_eligible() {
        return Err(CoreError::NotEligible(format!(
            "mentor membership stage {} is not eligible",
            record.membership_stage.as_str()
        )));
    }
    Ok(record)
}
