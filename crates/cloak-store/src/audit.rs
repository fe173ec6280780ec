//! Append-only audit log. There is no update or delete helper, and triggers
//! in the schema reject both at the SQL level.

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{AuditEntry, AuditFilter, AuditPage, NewAuditEntry};
use crate::sql::{parse_enum, parse_opt_pseudonym, parse_ts, ts};

pub const DEFAULT_PER_PAGE: u32 = 50;
pub const MAX_PER_PAGE: u32 = 500;

impl Database {
    pub fn append_audit(&self, entry: &NewAuditEntry) -> Result<AuditEntry> {
        insert_audit(self.conn(), entry)
    }

    /// Filtered, paginated read, oldest first by timestamp.
    pub fn query_audit(&self, filter: &AuditFilter) -> Result<AuditPage> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(user_id) = filter.subject_user_id {
            clauses.push("subject_user_id = ?");
            args.push(Value::Integer(user_id.0));
        }
        if let Some(p) = &filter.subject_pseudonym {
            clauses.push("subject_pseudonym = ?");
            args.push(Value::Text(p.as_str().to_string()));
        }
        if let Some(actor) = &filter.actor {
            clauses.push("actor = ?");
            args.push(Value::Text(actor.clone()));
        }
        if let Some(kind) = filter.kind {
            clauses.push("kind = ?");
            args.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(from) = &filter.from {
            clauses.push("created_at >= ?");
            args.push(Value::Text(ts(from)));
        }
        if let Some(to) = &filter.to {
            clauses.push("created_at <= ?");
            args.push(Value::Text(ts(to)));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM audit_log{where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let page = filter.page.unwrap_or(1).max(1);
        let per_page = filter
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let offset = i64::from(page - 1) * i64::from(per_page);

        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, kind, subject_user_id, subject_pseudonym, actor, reason, details, created_at
               FROM audit_log{where_sql}
              ORDER BY created_at ASC, id ASC
              LIMIT {per_page} OFFSET {offset}"
        ))?;

        let rows = stmt.query_map(params_from_iter(args.iter()), row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(AuditPage {
            entries,
            total: total as u64,
            page,
            per_page,
        })
    }
}

pub(crate) fn insert_audit(conn: &Connection, entry: &NewAuditEntry) -> Result<AuditEntry> {
    let now = Utc::now();
    let details = serde_json::to_string(&entry.details)?;

    conn.execute(
        "INSERT INTO audit_log
            (kind, subject_user_id, subject_pseudonym, actor, reason, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.kind.as_str(),
            entry.subject_user_id.map(|u| u.0),
            entry.subject_pseudonym.as_ref().map(|p| p.as_str()),
            entry.actor,
            entry.reason,
            details,
            ts(&now),
        ],
    )
    .map_err(StoreError::classify)?;

    Ok(AuditEntry {
        id: conn.last_insert_rowid(),
        kind: entry.kind,
        subject_user_id: entry.subject_user_id,
        subject_pseudonym: entry.subject_pseudonym.clone(),
        actor: entry.actor.clone(),
        reason: entry.reason.clone(),
        details: entry.details.clone(),
        created_at: now,
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let kind: String = row.get(1)?;
    let subject: Option<i64> = row.get(2)?;
    let details: String = row.get(6)?;
    let created: String = row.get(7)?;

    let details = serde_json::from_str(&details).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(AuditEntry {
        id: row.get(0)?,
        kind: parse_enum(1, &kind)?,
        subject_user_id: subject.map(cloak_shared::UserId),
        subject_pseudonym: parse_opt_pseudonym(3, row.get(3)?)?,
        actor: row.get(4)?,
        reason: row.get(5)?,
        details,
        created_at: parse_ts(7, &created)?,
    })
}
