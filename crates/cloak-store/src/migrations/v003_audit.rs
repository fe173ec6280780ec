//! v003 -- Append-only audit log.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    kind              TEXT NOT NULL,
    subject_user_id   INTEGER,
    subject_pseudonym TEXT,
    actor             TEXT NOT NULL,
    reason            TEXT,
    details           TEXT NOT NULL DEFAULT '{}',   -- JSON object
    created_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_subject ON audit_log(subject_user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_audit_pseudonym ON audit_log(subject_pseudonym, created_at);
CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_log(actor, created_at);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update
    BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
    BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
