//! Identity records and the masking transaction.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use cloak_shared::{MembershipStage, Pseudonym, RelationshipKind, UserId};

use crate::classes::insert_class_member;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::audit::insert_audit;
use crate::models::{IdentityRecord, MaskCommit, MaskCommitOutcome, NewIdentity};
use crate::relationships::insert_edge;
use crate::sql::{parse_avatar, parse_enum, parse_opt_pseudonym, parse_opt_ts, parse_ts, ts};

const SELECT_IDENTITY: &str = "
    SELECT i.id, i.username, i.email, i.phone, i.real_name, i.address,
           i.membership_stage, i.pseudonym, i.masked, i.vault_ref, i.avatar,
           i.created_at, i.masked_at,
           (SELECT r.mentor_pseudonym FROM relationships r
             WHERE r.mentee_pseudonym = i.pseudonym
               AND r.kind = 'mentorship' AND r.active = 1),
           (SELECT c.class_id FROM class_memberships c
             WHERE c.member_pseudonym = i.pseudonym AND c.active = 1
             ORDER BY c.joined_at DESC LIMIT 1)
    FROM identities i";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Register a new, unmasked identity.
    pub fn insert_identity(&self, new: &NewIdentity) -> Result<IdentityRecord> {
        self.conn()
            .execute(
                "INSERT INTO identities
                    (username, email, phone, real_name, address, membership_stage, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    new.username,
                    new.email,
                    new.phone,
                    new.real_name,
                    new.address,
                    new.membership_stage.as_str(),
                    ts(&Utc::now()),
                ],
            )
            .map_err(StoreError::classify)?;

        self.get_identity(UserId(self.conn().last_insert_rowid()))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_identity(&self, id: UserId) -> Result<IdentityRecord> {
        self.conn()
            .query_row(
                &format!("{SELECT_IDENTITY} WHERE i.id = ?1"),
                params![id.0],
                row_to_identity,
            )
            .map_err(StoreError::classify)
    }

    pub fn find_by_pseudonym(&self, pseudonym: &Pseudonym) -> Result<IdentityRecord> {
        self.conn()
            .query_row(
                &format!("{SELECT_IDENTITY} WHERE i.pseudonym = ?1"),
                params![pseudonym.as_str()],
                row_to_identity,
            )
            .map_err(StoreError::classify)
    }

    /// Whether any identity already carries this pseudonym.
    pub fn pseudonym_exists(&self, pseudonym: &Pseudonym) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM identities WHERE pseudonym = ?1",
                params![pseudonym.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All masked identities, oldest mask first.
    pub fn list_masked_identities(&self) -> Result<Vec<IdentityRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_IDENTITY} WHERE i.masked = 1 ORDER BY i.masked_at ASC, i.id ASC"
        ))?;

        let rows = stmt.query_map([], row_to_identity)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Move an identity to another membership stage (application approval
    /// and the like). Returns `true` if a row changed.
    pub fn set_membership_stage(&self, id: UserId, stage: MembershipStage) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE identities SET membership_stage = ?1 WHERE id = ?2",
            params![stage.as_str(), id.0],
        )?;
        Ok(affected > 0)
    }

    /// Apply the relational half of masking in one immediate transaction.
    ///
    /// The update only matches a row that is still unmasked, so of two
    /// concurrent callers exactly one sees `Ok(true)`; the other gets
    /// `Ok(false)` and nothing is written.
    pub fn commit_masking(&mut self, commit: &MaskCommit) -> Result<MaskCommitOutcome> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(mentor) = &commit.mentor {
            if let Some(reason) = mentor_ineligibility(&tx, &mentor.mentor)? {
                return Ok(MaskCommitOutcome::MentorIneligible(reason));
            }
        }

        let avatar_json = serde_json::to_string(&commit.avatar)?;
        let affected = tx
            .execute(
                "UPDATE identities
                    SET pseudonym = ?1,
                        masked = 1,
                        vault_ref = ?2,
                        avatar = ?3,
                        masked_at = ?4,
                        username = ?5,
                        email = ?6,
                        phone = NULL,
                        real_name = NULL,
                        address = NULL
                  WHERE id = ?7 AND masked = 0 AND vault_ref IS NULL",
                params![
                    commit.pseudonym.as_str(),
                    commit.vault_ref,
                    avatar_json,
                    ts(&commit.masked_at),
                    commit.pseudonym.placeholder_username(),
                    commit.pseudonym.placeholder_email(),
                    commit.user_id.0,
                ],
            )
            .map_err(StoreError::classify)?;

        if affected == 0 {
            // dropping the transaction rolls it back
            return Ok(MaskCommitOutcome::AlreadyMasked);
        }

        if let Some(class_id) = &commit.class_id {
            insert_class_member(&tx, class_id, &commit.pseudonym, &commit.masked_at)?;
        }

        if let Some(mentor) = &commit.mentor {
            insert_edge(
                &tx,
                &mentor.mentor,
                &commit.pseudonym,
                RelationshipKind::Mentorship,
                &commit.masked_at,
            )?;
            insert_audit(&tx, &mentor.audit)?;
        }

        tx.commit()?;
        Ok(MaskCommitOutcome::Committed)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Why `mentor` cannot take a mentee right now, if it cannot.
fn mentor_ineligibility(conn: &Connection, mentor: &Pseudonym) -> Result<Option<String>> {
    let standing: Option<(bool, MembershipStage)> = conn
        .query_row(
            "SELECT masked, membership_stage FROM identities WHERE pseudonym = ?1",
            params![mentor.as_str()],
            |row| {
                let masked: i32 = row.get(0)?;
                let stage: String = row.get(1)?;
                Ok((masked != 0, parse_enum(1, &stage)?))
            },
        )
        .optional()?;

    Ok(match standing {
        None => Some("mentor not found".to_string()),
        Some((false, _)) => Some("mentor is not masked".to_string()),
        Some((true, stage)) if !stage.is_eligible() => Some(format!(
            "mentor membership stage {} is not eligible",
            stage.as_str()
        )),
        Some(_) => None,
    })
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityRecord> {
    let stage_str: String = row.get(6)?;
    let pseudonym: Option<String> = row.get(7)?;
    let masked: i32 = row.get(8)?;
    let created_str: String = row.get(11)?;

    Ok(IdentityRecord {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        real_name: row.get(4)?,
        address: row.get(5)?,
        membership_stage: parse_enum(6, &stage_str)?,
        pseudonym: parse_opt_pseudonym(7, pseudonym)?,
        masked: masked != 0,
        vault_ref: row.get(9)?,
        avatar: parse_avatar(10, row.get(10)?)?,
        created_at: parse_ts(11, &created_str)?,
        masked_at: parse_opt_ts(12, row.get(12)?)?,
        mentor: parse_opt_pseudonym(13, row.get(13)?)?,
        class_id: row.get(14)?,
    })
}
