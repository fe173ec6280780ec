//! Mentorship edges keyed purely by pseudonym.
//!
//! Edges are only ever deactivated, never deleted. A partial unique index
//! guarantees at most one active edge per mentee; the audited write helpers
//! put the edge change and its audit entry in the same transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use cloak_shared::{Pseudonym, RelationshipKind};

use crate::audit::insert_audit;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{MenteeSummary, NewAuditEntry, RelationshipEdge};
use crate::sql::{parse_avatar, parse_enum, parse_opt_ts, parse_pseudonym, parse_ts, ts};

const SELECT_EDGE: &str = "
    SELECT id, mentor_pseudonym, mentee_pseudonym, kind, active, created_at, deactivated_at
      FROM relationships";

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn active_mentor_edge(&self, mentee: &Pseudonym) -> Result<Option<RelationshipEdge>> {
        active_edge(self.conn(), mentee)
    }

    /// Active mentees of a mentor, oldest edge first.
    pub fn list_mentees(&self, mentor: &Pseudonym) -> Result<Vec<MenteeSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.mentee_pseudonym, i.avatar, r.created_at
               FROM relationships r
               JOIN identities i ON i.pseudonym = r.mentee_pseudonym
              WHERE r.mentor_pseudonym = ?1 AND r.kind = 'mentorship' AND r.active = 1
              ORDER BY r.created_at ASC",
        )?;

        let rows = stmt.query_map(params![mentor.as_str()], |row| {
            let mentee: String = row.get(0)?;
            let since: String = row.get(2)?;
            Ok(MenteeSummary {
                pseudonym: parse_pseudonym(0, &mentee)?,
                avatar: parse_avatar(1, row.get(1)?)?,
                since: parse_ts(2, &since)?,
            })
        })?;

        let mut mentees = Vec::new();
        for row in rows {
            mentees.push(row?);
        }
        Ok(mentees)
    }

    /// Every edge, active or not, where `mentee` is the mentee.
    pub fn mentorship_history(&self, mentee: &Pseudonym) -> Result<Vec<RelationshipEdge>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_EDGE} WHERE mentee_pseudonym = ?1 ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map(params![mentee.as_str()], row_to_edge)?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    // ------------------------------------------------------------------
    // Audited writes
    // ------------------------------------------------------------------

    /// Create an active mentorship edge. Fails with [`StoreError::Conflict`]
    /// when the mentee already has an active mentor.
    pub fn assign_mentor_audited(
        &mut self,
        mentor: &Pseudonym,
        mentee: &Pseudonym,
        audit: &NewAuditEntry,
    ) -> Result<RelationshipEdge> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let edge = insert_edge(&tx, mentor, mentee, RelationshipKind::Mentorship, &Utc::now())?;
        insert_audit(&tx, audit)?;

        tx.commit()?;
        Ok(edge)
    }

    /// Deactivate the mentee's active edge. [`StoreError::NotFound`] if none.
    pub fn remove_mentor_audited(
        &mut self,
        mentee: &Pseudonym,
        audit: &NewAuditEntry,
    ) -> Result<RelationshipEdge> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let edge = deactivate_active_edge(&tx, mentee)?;
        insert_audit(&tx, audit)?;

        tx.commit()?;
        Ok(edge)
    }

    /// Swap the mentee's active edge for a new one. Returns `(old, new)`.
    pub fn reassign_mentor_audited(
        &mut self,
        mentee: &Pseudonym,
        new_mentor: &Pseudonym,
        remove_audit: &NewAuditEntry,
        assign_audit: &NewAuditEntry,
    ) -> Result<(RelationshipEdge, RelationshipEdge)> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let old = deactivate_active_edge(&tx, mentee)?;
        insert_audit(&tx, remove_audit)?;

        let new = insert_edge(&tx, new_mentor, mentee, RelationshipKind::Mentorship, &Utc::now())?;
        insert_audit(&tx, assign_audit)?;

        tx.commit()?;
        Ok((old, new))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn insert_edge(
    conn: &Connection,
    mentor: &Pseudonym,
    mentee: &Pseudonym,
    kind: RelationshipKind,
    now: &DateTime<Utc>,
) -> Result<RelationshipEdge> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO relationships
            (id, mentor_pseudonym, mentee_pseudonym, kind, active, created_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5)",
        params![
            id.to_string(),
            mentor.as_str(),
            mentee.as_str(),
            kind.as_str(),
            ts(now),
        ],
    )
    .map_err(StoreError::classify)?;

    Ok(RelationshipEdge {
        id,
        mentor: mentor.clone(),
        mentee: mentee.clone(),
        kind,
        active: true,
        created_at: *now,
        deactivated_at: None,
    })
}

fn active_edge(conn: &Connection, mentee: &Pseudonym) -> Result<Option<RelationshipEdge>> {
    conn.query_row(
        &format!(
            "{SELECT_EDGE} WHERE mentee_pseudonym = ?1 AND kind = 'mentorship' AND active = 1"
        ),
        params![mentee.as_str()],
        row_to_edge,
    )
    .optional()
    .map_err(StoreError::from)
}

fn deactivate_active_edge(conn: &Connection, mentee: &Pseudonym) -> Result<RelationshipEdge> {
    let mut edge = active_edge(conn, mentee)?.ok_or(StoreError::NotFound)?;
    let now = Utc::now();

    conn.execute(
        "UPDATE relationships SET active = 0, deactivated_at = ?1 WHERE id = ?2",
        params![ts(&now), edge.id.to_string()],
    )?;

    edge.active = false;
    edge.deactivated_at = Some(now);
    Ok(edge)
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<RelationshipEdge> {
    let id_str: String = row.get(0)?;
    let mentor: String = row.get(1)?;
    let mentee: String = row.get(2)?;
    let kind: String = row.get(3)?;
    let active: i32 = row.get(4)?;
    let created: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(RelationshipEdge {
        id,
        mentor: parse_pseudonym(1, &mentor)?,
        mentee: parse_pseudonym(2, &mentee)?,
        kind: parse_enum(3, &kind)?,
        active: active != 0,
        created_at: parse_ts(5, &created)?,
        deactivated_at: parse_opt_ts(6, row.get(6)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identities::tests::{mask_commit, new_identity};
    use cloak_shared::{AuditKind, MembershipStage};

    fn masked_trio(db: &mut Database) -> (Pseudonym, Pseudonym, Pseudonym) {
        let names = [("m1", "PN-MMMMMMMMMM"), ("m2", "PN-NNNNNNNNNN"), ("s1", "PN-SSSSSSSSSS")];
        let mut out = Vec::new();
        for (name, p) in names {
            let rec = db
                .insert_identity(&new_identity(name, MembershipStage::Member))
                .unwrap();
            db.commit_masking(&mask_commit(rec.id, p)).unwrap();
            out.push(Pseudonym::parse(p).unwrap());
        }
        (out[0].clone(), out[1].clone(), out[2].clone())
    }

    fn audit(kind: AuditKind) -> NewAuditEntry {
        NewAuditEntry::new(kind, "admin:1")
    }

    #[test]
    fn test_assign_then_second_assign_conflicts() {
        let mut db = Database::open_in_memory().unwrap();
        let (m1, m2, s1) = masked_trio(&mut db);

        db.assign_mentor_audited(&m1, &s1, &audit(AuditKind::AssignMentor))
            .unwrap();
        let err = db
            .assign_mentor_audited(&m2, &s1, &audit(AuditKind::AssignMentor))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // the failed assign wrote no audit entry
        let page = db.query_audit(&Default::default()).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(db.active_mentor_edge(&s1).unwrap().unwrap().mentor, m1);
    }

    #[test]
    fn test_reassign_keeps_history() {
        let mut db = Database::open_in_memory().unwrap();
        let (m1, m2, s1) = masked_trio(&mut db);

        db.assign_mentor_audited(&m1, &s1, &audit(AuditKind::AssignMentor))
            .unwrap();
        let (old, new) = db
            .reassign_mentor_audited(
                &s1,
                &m2,
                &audit(AuditKind::RemoveMentor),
                &audit(AuditKind::AssignMentor),
            )
            .unwrap();

        assert_eq!(old.mentor, m1);
        assert!(!old.active);
        assert_eq!(new.mentor, m2);

        let history = db.mentorship_history(&s1).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|e| e.active).count(), 1);
        assert_eq!(db.find_by_pseudonym(&s1).unwrap().mentor, Some(m2.clone()));
        assert!(db.list_mentees(&m1).unwrap().is_empty());
        assert_eq!(db.list_mentees(&m2).unwrap()[0].pseudonym, s1);
    }

    #[test]
    fn test_remove_without_edge_is_not_found() {
        let mut db = Database::open_in_memory().unwrap();
        let (_, _, s1) = masked_trio(&mut db);

        assert!(matches!(
            db.remove_mentor_audited(&s1, &audit(AuditKind::RemoveMentor)),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_self_mentorship_rejected_by_schema() {
        let mut db = Database::open_in_memory().unwrap();
        let (_, _, s1) = masked_trio(&mut db);

        assert!(db
            .assign_mentor_audited(&s1, &s1, &audit(AuditKind::AssignMentor))
            .is_err());
    }
}
