//! End-to-end flow over the on-disk database and file vault.

use std::sync::Arc;

use cloak_core::{
    AlertKind, CloakConfig, CoreContext, CoreError, IdentityCore, MaskRequest, MemoryAlertSink,
    VaultRecord,
};
use cloak_shared::crypto::generate_symmetric_key;
use cloak_shared::{AuditKind, CallerContext, MembershipStage, Role, UserId};
use cloak_store::{AuditFilter, Database, NewIdentity};
use tempfile::TempDir;

struct Harness {
    core: IdentityCore,
    alerts: Arc<MemoryAlertSink>,
    vault_dir: std::path::PathBuf,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = CloakConfig::with_keys(generate_symmetric_key(), generate_symmetric_key());
    config.database_path = dir.path().join("cloak.db");
    config.vault_path = dir.path().join("vault");

    let mut ctx = CoreContext::from_config(&config).await.unwrap();
    let alerts = Arc::new(MemoryAlertSink::new());
    ctx.alerts = alerts.clone();

    Harness {
        core: IdentityCore::new(ctx),
        alerts,
        vault_dir: config.vault_path.clone(),
        _dir: dir,
    }
}

fn admin() -> CallerContext {
    CallerContext::new(UserId(1000), Role::Admin)
}

fn root() -> CallerContext {
    CallerContext::new(UserId(1001), Role::SuperAdmin)
}

async fn count(core: &IdentityCore, kind: AuditKind) -> u64 {
    core.get_audit_trail(
        &admin(),
        &AuditFilter {
            kind: Some(kind),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .total
}

async fn register_alice(core: &IdentityCore) -> UserId {
    core.register_identity(&NewIdentity {
        username: "alice".into(),
        email: "alice@x.com".into(),
        phone: Some("+15550199".into()),
        real_name: Some("Alice Liddell".into()),
        address: Some("1 Rabbit Hole".into()),
        membership_stage: MembershipStage::Applicant,
    })
    .await
    .unwrap()
    .id
}

#[tokio::test]
async fn test_mask_view_unmask_scenario() {
    let h = harness().await;
    let user = register_alice(&h.core).await;

    // application approved by the account layer
    h.core
        .set_membership_stage(user, MembershipStage::PreMember)
        .await
        .unwrap();

    let outcome = h
        .core
        .mask_identity(&admin(), MaskRequest::new(user))
        .await
        .unwrap();
    let p1 = outcome.pseudonym.clone();

    // the subject still sees their own email
    let me = CallerContext::new(user, Role::Member).with_pseudonym(p1.clone());
    let status = h.core.get_identity_status_for_self(&me, user).await.unwrap();
    assert_eq!(status.pii.email, "alice@x.com");
    assert_eq!(status.pii.address.as_deref(), Some("1 Rabbit Hole"));

    // everyone else sees pseudonym-derived fields only
    let profile = h.core.resolve_public_profile(&me, p1.as_str()).await.unwrap();
    let public = serde_json::to_string(&profile).unwrap();
    assert!(!public.contains("alice"));
    assert!(!public.contains("Liddell"));
    assert_eq!(profile.avatar, Some(outcome.avatar));

    // non-super-admins are rejected and leave no trace
    for caller in [admin(), me.clone()] {
        assert!(matches!(
            h.core.unmask_identity(&caller, p1.as_str(), "curious").await,
            Err(CoreError::Unauthorized)
        ));
    }
    assert_eq!(count(&h.core, AuditKind::Unmask).await, 0);

    let revealed = h
        .core
        .unmask_identity(&root(), p1.as_str(), "harassment report #12")
        .await
        .unwrap();
    assert_eq!(revealed.pii.email, "alice@x.com");
    assert_eq!(revealed.pii.real_name.as_deref(), Some("Alice Liddell"));
    assert_eq!(count(&h.core, AuditKind::Unmask).await, 1);
    assert_eq!(count(&h.core, AuditKind::Mask).await, 1);

    // masking again changes nothing
    assert!(matches!(
        h.core.mask_identity(&admin(), MaskRequest::new(user)).await,
        Err(CoreError::AlreadyMasked)
    ));
    assert_eq!(std::fs::read_dir(&h.vault_dir).unwrap().count(), 1);
    assert_eq!(count(&h.core, AuditKind::Mask).await, 1);
}

#[tokio::test]
async fn test_tampered_vault_file_is_detected() {
    let h = harness().await;
    let user = register_alice(&h.core).await;
    h.core
        .set_membership_stage(user, MembershipStage::Member)
        .await
        .unwrap();
    let p1 = h
        .core
        .mask_identity(&admin(), MaskRequest::new(user))
        .await
        .unwrap()
        .pseudonym;

    // the vault id is never exposed through the core; read it from the store
    let vault_id = {
        let db = h.core.context().db.lock().await;
        db.get_identity(user).unwrap().vault_ref.unwrap()
    };
    let path = h.vault_dir.join(format!("{vault_id}.vault"));
    let raw = std::fs::read(&path).unwrap();
    let mut stored = VaultRecord::decode(&vault_id, &raw).unwrap();
    stored.sealed.tag[3] ^= 0x80;
    std::fs::write(&path, stored.encode().unwrap()).unwrap();

    assert!(matches!(
        h.core.unmask_identity(&root(), p1.as_str(), "review").await,
        Err(CoreError::DecryptionFailure)
    ));
    assert_eq!(count(&h.core, AuditKind::Unmask).await, 0);
    assert_eq!(count(&h.core, AuditKind::UnmaskFailed).await, 1);

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::DecryptionFailure);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let identity_key = generate_symmetric_key();
    let vault_key = generate_symmetric_key();
    let mut config = CloakConfig::with_keys(identity_key, vault_key);
    config.database_path = dir.path().join("cloak.db");
    config.vault_path = dir.path().join("vault");

    let p1 = {
        let core = IdentityCore::open(&config).await.unwrap();
        let user = register_alice(&core).await;
        core.set_membership_stage(user, MembershipStage::Member)
            .await
            .unwrap();
        core.mask_identity(&admin(), MaskRequest::new(user))
            .await
            .unwrap()
            .pseudonym
    };

    let core = IdentityCore::open(&config).await.unwrap();
    let revealed = core
        .unmask_identity(&root(), p1.as_str(), "after restart")
        .await
        .unwrap();
    assert_eq!(revealed.pii.username, "alice");

    // a different key pair cannot open the same vault
    let mut wrong = CloakConfig::with_keys(generate_symmetric_key(), generate_symmetric_key());
    wrong.database_path = config.database_path.clone();
    wrong.vault_path = config.vault_path.clone();
    let core = IdentityCore::open(&wrong).await.unwrap();
    assert!(matches!(
        core.unmask_identity(&root(), p1.as_str(), "wrong keys").await,
        Err(CoreError::DecryptionFailure)
    ));

    // the primary store never held the real email after masking
    let db = Database::open_at(&config.database_path).unwrap();
    let masked = db.list_masked_identities().unwrap();
    assert_eq!(masked.len(), 1);
    assert_ne!(masked[0].email, "alice@x.com");
}

#[tokio::test]
async fn test_wrong_identity_key_fails_whole_unmask() {
    let dir = TempDir::new().unwrap();
    let vault_key = generate_symmetric_key();
    let mut config = CloakConfig::with_keys(generate_symmetric_key(), vault_key);
    config.database_path = dir.path().join("cloak.db");
    config.vault_path = dir.path().join("vault");

    let p1 = {
        let core = IdentityCore::open(&config).await.unwrap();
        let user = register_alice(&core).await;
        core.set_membership_stage(user, MembershipStage::Member)
            .await
            .unwrap();
        core.mask_identity(&admin(), MaskRequest::new(user))
            .await
            .unwrap()
            .pseudonym
    };

    // the outer vault layer still opens; the per-field layer does not
    let mut rotated = CloakConfig::with_keys(generate_symmetric_key(), vault_key);
    rotated.database_path = config.database_path.clone();
    rotated.vault_path = config.vault_path.clone();
    let mut ctx = CoreContext::from_config(&rotated).await.unwrap();
    let alerts = Arc::new(MemoryAlertSink::new());
    ctx.alerts = alerts.clone();
    let core = IdentityCore::new(ctx);

    assert!(matches!(
        core.unmask_identity(&root(), p1.as_str(), "inner layer").await,
        Err(CoreError::DecryptionFailure)
    ));
    assert_eq!(count(&core, AuditKind::Unmask).await, 0);
    assert_eq!(count(&core, AuditKind::UnmaskFailed).await, 1);

    let raised = alerts.alerts();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].kind, AlertKind::DecryptionFailure);
}
