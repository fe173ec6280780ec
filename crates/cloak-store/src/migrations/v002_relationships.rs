//! v002 -- Classes, class membership and mentorship edges.
//!
//! Edges reference identities by pseudonym only. They are never deleted;
//! `active` is cleared instead so history survives.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS classes (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS class_memberships (
    class_id         TEXT NOT NULL,
    member_pseudonym TEXT NOT NULL,
    active           INTEGER NOT NULL DEFAULT 1,
    joined_at        TEXT NOT NULL,

    PRIMARY KEY (class_id, member_pseudonym),
    FOREIGN KEY (class_id) REFERENCES classes(id),
    FOREIGN KEY (member_pseudonym) REFERENCES identities(pseudonym)
);

CREATE INDEX IF NOT EXISTS idx_class_memberships_member
    ON class_memberships(member_pseudonym);

CREATE TABLE IF NOT EXISTS relationships (
    id               TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    mentor_pseudonym TEXT NOT NULL,
    mentee_pseudonym TEXT NOT NULL,
    kind             TEXT NOT NULL,
    active           INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,
    deactivated_at   TEXT,

    CHECK (mentor_pseudonym <> mentee_pseudonym),
    FOREIGN KEY (mentor_pseudonym) REFERENCES identities(pseudonym),
    FOREIGN KEY (mentee_pseudonym) REFERENCES identities(pseudonym)
);

-- at most one active edge of a kind per mentee
CREATE UNIQUE INDEX IF NOT EXISTS idx_relationships_active_mentee
    ON relationships(mentee_pseudonym, kind) WHERE active = 1;

CREATE INDEX IF NOT EXISTS idx_relationships_mentor
    ON relationships(mentor_pseudonym, active);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
