//! v001 -- Initial schema creation.
//!
//! Creates the `pending_proofs` table: proofs recorded while the backend was
//! unreachable, one row per entry.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Pending (offline) proofs
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pending_proofs (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT, -- insertion order
    id             TEXT NOT NULL UNIQUE,              -- provisional id, "offline-<uuid>"
    user_id        TEXT NOT NULL,
    title          TEXT NOT NULL,
    category       TEXT NOT NULL,
    description    TEXT NOT NULL DEFAULT '',
    attachment_url TEXT,
    created_at     TEXT NOT NULL,                     -- RFC-3339
    attempts       INTEGER NOT NULL DEFAULT 0,        -- failed replays so far
    last_error     TEXT
);

CREATE INDEX IF NOT EXISTS idx_pending_proofs_user_seq
    ON pending_proofs(user_id, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
