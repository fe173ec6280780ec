//! Shared fixtures for the unit tests in this crate.

use std::sync::Arc;

use cloak_shared::crypto::generate_symmetric_key;
use cloak_shared::{AuditKind, CallerContext, EnvelopeCrypto, MembershipStage, Pseudonym, Role, UserId};
use cloak_store::{AuditEntry, AuditFilter, Database, IdentityRecord, NewIdentity};

use crate::alerts::MemoryAlertSink;
use crate::context::CoreContext;
use crate::masking::MaskRequest;
use crate::service::IdentityCore;
use crate::vault::{MemoryVault, VaultRecord, VaultStore};

pub fn caller(id: i64, role: Role) -> CallerContext {
    CallerContext::new(UserId(id), role)
}

pub struct Kit {
    pub core: IdentityCore,
    pub vault: Arc<MemoryVault>,
    pub alerts: Arc<MemoryAlertSink>,
}

impl Kit {
    pub fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        let crypto = EnvelopeCrypto::new(generate_symmetric_key(), generate_symmetric_key()).unwrap();
        let vault = Arc::new(MemoryVault::new());
        let alerts = Arc::new(MemoryAlertSink::new());
        let ctx = CoreContext::new(db, crypto, vault.clone(), alerts.clone());
        Self {
            core: IdentityCore::new(ctx),
            vault,
            alerts,
        }
    }

    pub fn admin(&self) -> CallerContext {
        caller(800, Role::Admin)
    }

    pub fn root(&self) -> CallerContext {
        caller(900, Role::SuperAdmin)
    }

    pub async fn register(&self, name: &str, stage: MembershipStage) -> UserId {
        self.core
            .register_identity(&NewIdentity {
                username: name.to_string(),
                email: format!("{name}@x.com"),
                phone: Some("+15550100".to_string()),
                real_name: Some(format!("{name} Real")),
                address: None,
                membership_stage: stage,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn masked_user(&self, name: &str, stage: MembershipStage) -> (UserId, Pseudonym) {
        let user = self.register(name, stage).await;
        let outcome = self
            .core
            .mask_identity(&self.admin(), MaskRequest::new(user))
            .await
            .unwrap();
        (user, outcome.pseudonym)
    }

    pub async fn masked(&self, name: &str, stage: MembershipStage) -> Pseudonym {
        self.masked_user(name, stage).await.1
    }

    pub async fn masked_in_class(&self, name: &str, class_id: &str) -> Pseudonym {
        let user = self.register(name, MembershipStage::Member).await;
        let mut req = MaskRequest::new(user);
        req.class_id = Some(class_id.to_string());
        self.core
            .mask_identity(&self.admin(), req)
            .await
            .unwrap()
            .pseudonym
    }

    pub async fn record(&self, user: UserId) -> IdentityRecord {
        self.core.context().db.lock().await.get_identity(user).unwrap()
    }

    pub async fn record_by(&self, p: &Pseudonym) -> IdentityRecord {
        self.core.context().db.lock().await.find_by_pseudonym(p).unwrap()
    }

    pub async fn audit(&self, kind: AuditKind) -> Vec<AuditEntry> {
        let filter = AuditFilter {
            kind: Some(kind),
            per_page: Some(cloak_store::audit::MAX_PER_PAGE),
            ..Default::default()
        };
        self.core
            .context()
            .db
            .lock()
            .await
            .query_audit(&filter)
            .unwrap()
            .entries
    }

    pub async fn raw_entry(&self, vault_id: &str) -> Vec<u8> {
        self.vault.retrieve(vault_id).await.unwrap()
    }

    /// Flip one bit of the outer authentication tag.
    pub async fn tamper_tag(&self, vault_id: &str) {
        let raw = self.raw_entry(vault_id).await;
        let mut stored = VaultRecord::decode(vault_id, &raw).unwrap();
        stored.sealed.tag[0] ^= 0x01;
        self.vault
            .replace_raw(vault_id, stored.encode().unwrap())
            .await
            .unwrap();
    }

    pub async fn purge(&self, vault_id: &str) {
        self.vault.purge(vault_id).await.unwrap();
    }
}
