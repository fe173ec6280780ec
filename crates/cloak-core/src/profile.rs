//! Read paths: the public projection of a pseudonym, and a user's own view of
//! their identity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use cloak_shared::{
    AuditKind, AvatarDescriptor, CallerContext, IdentityPii, MembershipStage, Pseudonym, UserId,
};
use cloak_store::{NewAuditEntry, StoreError};

use crate::audit::record_best_effort;
use crate::error::CoreError;
use crate::gate::{authorize, Operation, Tier};
use crate::service::{load_identity, IdentityCore};

/// What anyone may see about a pseudonym.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicProfile {
    pub pseudonym: Pseudonym,
    pub display_name: String,
    pub avatar: Option<AvatarDescriptor>,
    pub membership_stage: MembershipStage,
    pub mentor: Option<Pseudonym>,
    pub class_id: Option<String>,
}

/// A user's view of their own identity, including the real PII.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityStatus {
    pub user_id: UserId,
    pub masked: bool,
    pub pseudonym: Option<Pseudonym>,
    pub avatar: Option<AvatarDescriptor>,
    pub membership_stage: MembershipStage,
    pub mentor: Option<Pseudonym>,
    pub class_id: Option<String>,
    pub masked_at: Option<DateTime<Utc>>,
    pub pii: IdentityPii,
}

impl IdentityCore {
    /// Pseudonym-derived fields only. Any authenticated caller.
    pub async fn resolve_public_profile(
        &self,
        caller: &CallerContext,
        pseudonym: &str,
    ) -> Result<PublicProfile, CoreError> {
        authorize(caller, Operation::ResolvePublicProfile, Tier::Authenticated)?;
        let pseudonym = Pseudonym::parse(pseudonym)?;

        let db = self.ctx.db.lock().await;
        let record = db.find_by_pseudonym(&pseudonym).map_err(|e| match e {
            StoreError::NotFound => CoreError::not_found("pseudonym"),
            other => other.into(),
        })?;
        if !record.masked {
            return Err(CoreError::not_found("pseudonym"));
        }

        Ok(PublicProfile {
            display_name: pseudonym.placeholder_username(),
            pseudonym,
            avatar: record.avatar,
            membership_stage: record.membership_stage,
            mentor: record.mentor,
            class_id: record.class_id,
        })
    }

    /// The subject's own identity. Only the subject may call this, whatever
    /// their role; for a masked identity the PII comes from the vault.
    pub async fn get_identity_status_for_self(
        &self,
        caller: &CallerContext,
        user_id: UserId,
    ) -> Result<IdentityStatus, CoreError> {
        authorize(caller, Operation::ViewOwnIdentity, Tier::Subject(user_id))?;

        let record = {
            let db = self.ctx.db.lock().await;
            load_identity(&db, user_id)?
        };

        let (pii, masked_at) = if record.masked {
            let revealed = self.reveal(&record).await?;
            {
                let db = self.ctx.db.lock().await;
                record_best_effort(
                    &db,
                    self.ctx.alerts.as_ref(),
                    &NewAuditEntry::new(AuditKind::View, caller.actor_label())
                        .subject(Some(record.id), record.pseudonym.clone())
                        .details(json!({ "self": true })),
                );
            }
            (revealed.pii, record.masked_at)
        } else {
            let pii = IdentityPii {
                username: record.username.clone(),
                email: record.email.clone(),
                phone: record.phone.clone(),
                real_name: record.real_name.clone(),
                address: record.address.clone(),
            };
            (pii, None)
        };

        Ok(IdentityStatus {
            user_id: record.id,
            masked: record.masked,
            pseudonym: record.pseudonym,
            avatar: record.avatar,
            membership_stage: record.membership_stage,
            mentor: record.mentor,
            class_id: record.class_id,
            masked_at,
            pii,
        })
    }
}
