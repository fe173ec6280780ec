use std::sync::Arc;

use tokio::sync::Mutex;

use cloak_shared::{EnvelopeCrypto, PseudonymGenerator};
use cloak_store::Database;

use crate::alerts::{AlertSink, TracingAlertSink};
use crate::config::CloakConfig;
use crate::error::CoreError;
use crate::vault::{FsVault, VaultStore};

/// Every collaborator the orchestrators need, constructed once and shared.
#[derive(Clone)]
pub struct CoreContext {
    pub db: Arc<Mutex<Database>>,
    pub crypto: Arc<EnvelopeCrypto>,
    pub vault: Arc<dyn VaultStore>,
    pub alerts: Arc<dyn AlertSink>,
    pub generator: PseudonymGenerator,
    pub bulk_limit: usize,
}

impl CoreContext {
    pub fn new(
        db: Database,
        crypto: EnvelopeCrypto,
        vault: Arc<dyn VaultStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            crypto: Arc::new(crypto),
            vault,
            alerts,
            generator: PseudonymGenerator::new(cloak_shared::constants::DEFAULT_PSEUDONYM_ATTEMPTS),
            bulk_limit: cloak_shared::constants::DEFAULT_BULK_GENERATE_LIMIT,
        }
    }

    /// Open the on-disk database and vault named by `config`.
    pub async fn from_config(config: &CloakConfig) -> Result<Self, CoreError> {
        let crypto = config.envelope()?;
        let db = Database::open_at(&config.database_path)?;
        let vault = FsVault::new(config.vault_path.clone()).await?;

        let mut ctx = Self::new(db, crypto, Arc::new(vault), Arc::new(TracingAlertSink));
        ctx.generator = PseudonymGenerator::new(config.pseudonym_attempts);
        ctx.bulk_limit = config.bulk_generate_limit;
        Ok(ctx)
    }

    pub fn with_generator(mut self, generator: PseudonymGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_bulk_limit(mut self, limit: usize) -> Self {
        self.bulk_limit = limit.max(1);
        self
    }
}
