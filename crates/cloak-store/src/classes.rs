//! Classes and pseudonym-keyed class membership.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use cloak_shared::Pseudonym;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Class, ClassMember};
use crate::sql::{parse_avatar, parse_pseudonym, parse_ts, ts};

impl Database {
    pub fn create_class(&self, id: &str, name: &str) -> Result<Class> {
        let now = Utc::now();
        self.conn()
            .execute(
                "INSERT INTO classes (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![id, name, ts(&now)],
            )
            .map_err(StoreError::classify)?;

        Ok(Class {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
        })
    }

    pub fn get_class(&self, id: &str) -> Result<Class> {
        self.conn()
            .query_row(
                "SELECT id, name, created_at FROM classes WHERE id = ?1",
                params![id],
                |row| {
                    let created: String = row.get(2)?;
                    Ok(Class {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: parse_ts(2, &created)?,
                    })
                },
            )
            .map_err(StoreError::classify)
    }

    pub fn is_class_member(&self, class_id: &str, pseudonym: &Pseudonym) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM class_memberships
                  WHERE class_id = ?1 AND member_pseudonym = ?2 AND active = 1",
                params![class_id, pseudonym.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Active members of a class. Joins only the pseudonym and avatar columns.
    pub fn list_class_members(&self, class_id: &str) -> Result<Vec<ClassMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.class_id, m.member_pseudonym, i.avatar, m.joined_at
               FROM class_memberships m
               JOIN identities i ON i.pseudonym = m.member_pseudonym
              WHERE m.class_id = ?1 AND m.active = 1
              ORDER BY m.joined_at ASC",
        )?;

        let rows = stmt.query_map(params![class_id], |row| {
            let pseudonym: String = row.get(1)?;
            let joined: String = row.get(3)?;
            Ok(ClassMember {
                class_id: row.get(0)?,
                pseudonym: parse_pseudonym(1, &pseudonym)?,
                avatar: parse_avatar(2, row.get(2)?)?,
                joined_at: parse_ts(3, &joined)?,
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }
}

pub(crate) fn insert_class_member(
    conn: &Connection,
    class_id: &str,
    pseudonym: &Pseudonym,
    joined_at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO class_memberships (class_id, member_pseudonym, active, joined_at)
         VALUES (?1, ?2, 1, ?3)",
        params![class_id, pseudonym.as_str(), ts(joined_at)],
    )
    .map_err(StoreError::classify)?;
    Ok(())
}
