//! Audit trail service.
//!
//! Two write policies exist. [`record_required`] is used where the audit
//! record gates the result (unmask): a failure becomes
//! [`CoreError::AuditUnavailable`]. [`record_best_effort`] is used after a
//! committed change (mask, view, generate): a failure raises a reconciliation
//! alert and the operation still succeeds.

use cloak_shared::CallerContext;
use cloak_store::{AuditEntry, AuditFilter, AuditPage, Database, NewAuditEntry};

use crate::alerts::{Alert, AlertKind, AlertSink};
use crate::error::CoreError;
use crate::gate::{authorize, Operation, Tier};
use crate::service::IdentityCore;

pub(crate) fn record_required(db: &Database, entry: &NewAuditEntry) -> Result<AuditEntry, CoreError> {
    db.append_audit(entry).map_err(|e| {
        tracing::error!(
            kind = entry.kind.as_str(),
            actor = %entry.actor,
            error = %e,
            "required audit write failed"
        );
        CoreError::AuditUnavailable
    })
}

pub(crate) fn record_best_effort(
    db: &Database,
    alerts: &dyn AlertSink,
    entry: &NewAuditEntry,
) -> Option<AuditEntry> {
    match db.append_audit(entry) {
        Ok(written) => Some(written),
        Err(e) => {
            alerts.raise(Alert {
                kind: AlertKind::AuditReconciliation,
                subject_user_id: entry.subject_user_id,
                pseudonym: entry.subject_pseudonym.clone(),
                vault_id: None,
                detail: format!("{} audit not written: {e}", entry.kind.as_str()),
            });
            None
        }
    }
}

impl IdentityCore {
    /// Filtered, paginated audit read. Admin tier.
    pub async fn get_audit_trail(
        &self,
        caller: &CallerContext,
        filter: &AuditFilter,
    ) -> Result<AuditPage, CoreError> {
        authorize(caller, Operation::ReadAuditTrail, Tier::Admin)?;
        let db = self.ctx.db.lock().await;
        Ok(db.query_audit(filter)?)
    }

    /// Append an entry on behalf of a collaborator (for example a VIEW logged
    /// by a dashboard). Entries are never updated or deleted.
    pub async fn record_audit(&self, entry: &NewAuditEntry) -> Result<AuditEntry, CoreError> {
        let db = self.ctx.db.lock().await;
        record_required(&db, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MemoryAlertSink;
    use crate::testkit;
    use cloak_shared::{AuditKind, Role, UserId};

    #[test]
    fn test_best_effort_failure_raises_reconciliation_alert() {
        let db = Database::open_in_memory().unwrap();
        // without the table every insert fails
        db.conn().execute_batch("DROP TABLE audit_log").unwrap();
        let sink = MemoryAlertSink::new();

        let entry = NewAuditEntry::new(AuditKind::Mask, "admin:1").subject(Some(UserId(4)), None);
        assert!(record_best_effort(&db, &sink, &entry).is_none());

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::AuditReconciliation);
        assert_eq!(alerts[0].subject_user_id, Some(UserId(4)));

        assert!(matches!(
            record_required(&db, &entry),
            Err(CoreError::AuditUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_audit_trail_requires_admin() {
        let kit = testkit::Kit::new();
        kit.core
            .record_audit(&NewAuditEntry::new(AuditKind::View, "member:1"))
            .await
            .unwrap();

        let member = testkit::caller(1, Role::Member);
        assert!(matches!(
            kit.core.get_audit_trail(&member, &AuditFilter::default()).await,
            Err(CoreError::Unauthorized)
        ));

        let admin = testkit::caller(2, Role::Admin);
        let page = kit
            .core
            .get_audit_trail(&admin, &AuditFilter::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }
}
