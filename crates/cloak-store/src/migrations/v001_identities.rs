//! v001 -- Identity records.
//!
//! One row per registered user. Until masking, the PII columns hold the real
//! values; afterwards they hold pseudonym-derived placeholders and the
//! original lives only in the identity vault, referenced by `vault_ref`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    username         TEXT NOT NULL UNIQUE,
    email            TEXT NOT NULL UNIQUE,
    phone            TEXT,
    real_name        TEXT,
    address          TEXT,
    membership_stage TEXT NOT NULL DEFAULT 'applicant',
    pseudonym        TEXT UNIQUE,                 -- NULL until masked
    masked           INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    vault_ref        TEXT UNIQUE,                 -- present iff masked
    avatar           TEXT,                        -- JSON AvatarDescriptor
    created_at       TEXT NOT NULL,               -- RFC-3339
    masked_at        TEXT,

    CHECK ((masked = 1 AND vault_ref IS NOT NULL AND pseudonym IS NOT NULL)
        OR (masked = 0 AND vault_ref IS NULL))
);
"#;

/// Apply the migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
