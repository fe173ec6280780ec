use cloak_store::{Class, Database, IdentityRecord, NewIdentity};
use cloak_shared::{MembershipStage, UserId};

use crate::config::CloakConfig;
use crate::context::CoreContext;
use crate::error::CoreError;

/// Entry point for every identity operation.
///
/// Each operation takes the caller context established by the web layer and
/// passes it through the authorization gate before anything else. The
/// operations themselves live next to the component they drive
/// (`masking`, `unmasking`, `registry`, ...).
#[derive(Clone)]
pub struct IdentityCore {
    pub(crate) ctx: CoreContext,
}

impl IdentityCore {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    pub async fn open(config: &CloakConfig) -> Result<Self, CoreError> {
        Ok(Self::new(CoreContext::from_config(config).await?))
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    // ------------------------------------------------------------------
    // Hooks for the account and class collaborators
    // ------------------------------------------------------------------

    /// Register a new, unmasked identity.
    pub async fn register_identity(&self, new: &NewIdentity) -> Result<IdentityRecord, CoreError> {
        let db = self.ctx.db.lock().await;
        db.insert_identity(new).map_err(|e| match e {
            cloak_store::StoreError::Conflict(_) => {
                CoreError::Validation("username or email already registered".to_string())
            }
            other => other.into(),
        })
    }

    pub async fn set_membership_stage(
        &self,
        user_id: UserId,
        stage: MembershipStage,
    ) -> Result<(), CoreError> {
        let db = self.ctx.db.lock().await;
        if db.set_membership_stage(user_id, stage)? {
            Ok(())
        } else {
            Err(CoreError::not_found("identity"))
        }
    }

    pub async fn create_class(&self, id: &str, name: &str) -> Result<Class, CoreError> {
        if id.trim().is_empty() || name.trim().is_empty() {
            return Err(CoreError::Validation("class id and name are required".to_string()));
        }
        let db = self.ctx.db.lock().await;
        db.create_class(id, name).map_err(|e| match e {
            cloak_store::StoreError::Conflict(_) => {
                CoreError::Validation(format!("class {id} already exists"))
            }
            other => other.into(),
        })
    }
}

/// Load an identity by id, mapping a missing row to a typed error.
pub(crate) fn load_identity(db: &Database, user_id: UserId) -> Result<IdentityRecord, CoreError> {
    db.get_identity(user_id).map_err(|e| match e {
        cloak_store::StoreError::NotFound => CoreError::not_found("identity"),
        other => other.into(),
    })
}
