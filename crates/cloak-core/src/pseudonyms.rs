//! Pseudonym generation against the identity table.

use std::collections::HashSet;

use serde_json::json;

use cloak_shared::{AuditKind, CallerContext, GenerateError, Pseudonym, PseudonymGenerator};
use cloak_store::{Database, NewAuditEntry, StoreError};

use crate::audit::record_best_effort;
use crate::error::CoreError;
use crate::gate::{authorize, Operation, Tier};
use crate::service::IdentityCore;

/// Draw one pseudonym not present in the identity table nor in `reserved`.
pub(crate) fn generate_unique(
    generator: &PseudonymGenerator,
    db: &Database,
    reserved: &HashSet<Pseudonym>,
) -> Result<Pseudonym, CoreError> {
    generator
        .generate(|candidate| -> Result<bool, StoreError> {
            Ok(reserved.contains(candidate) || db.pseudonym_exists(candidate)?)
        })
        .map_err(|e| match e {
            GenerateError::Exhausted { attempts } => {
                tracing::warn!(attempts, "pseudonym generation exhausted");
                CoreError::GenerationExhausted { attempts }
            }
            GenerateError::Lookup(err) => err.into(),
        })
}

impl IdentityCore {
    /// One fresh pseudonym. Admin tier.
    pub async fn generate_pseudonym(&self, caller: &CallerContext) -> Result<Pseudonym, CoreError> {
        let mut batch = self.generate_pseudonyms(caller, 1).await?;
        batch
            .pop()
            .ok_or_else(|| CoreError::Internal("empty pseudonym batch".to_string()))
    }

    /// `count` distinct pseudonyms, none already assigned. Admin tier.
    ///
    /// Nothing is reserved: a pseudonym handed out here is only checked again
    /// when a masking actually assigns one.
    pub async fn generate_pseudonyms(
        &self,
        caller: &CallerContext,
        count: usize,
    ) -> Result<Vec<Pseudonym>, CoreError> {
        authorize(caller, Operation::GeneratePseudonyms, Tier::Admin)?;
        if count == 0 || count > self.ctx.bulk_limit {
            return Err(CoreError::Validation(format!(
                "count must be between 1 and {}",
                self.ctx.bulk_limit
            )));
        }

        let db = self.ctx.db.lock().await;
        let mut seen = HashSet::with_capacity(count);
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            let p = generate_unique(&self.ctx.generator, &db, &seen)?;
            seen.insert(p.clone());
            batch.push(p);
        }

        record_best_effort(
            &db,
            self.ctx.alerts.as_ref(),
            &NewAuditEntry::new(AuditKind::Generate, caller.actor_label())
                .details(json!({ "count": count })),
        );

        tracing::debug!(count, actor = %caller.actor_label(), "generated pseudonyms");
        Ok(batch)
    }
}
