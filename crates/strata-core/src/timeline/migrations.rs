//! Timeline schema migrations
//!
//! Versioned DDL for the system of record. Each migration runs once, in
//! order, tracked through the `schema_version` table a fresh database gets
//! from v1.

/// Every migration, oldest first
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial timeline schema with tiering and retention",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Notification rows and the scoring feedback ledger",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Failed-event records for operator inspection",
        up: MIGRATION_V3_UP,
    },
];

/// One versioned schema change
#[derive(Debug, Clone)]
pub struct Migration {
    /// Schema version this migration brings the database to
    pub version: u32,
    /// What it changes
    pub description: &'static str,
    /// DDL batch to execute
    pub up: &'static str,
}

/// V1: timeline entries, the system of record
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);
INSERT INTO schema_version (version, applied_at) VALUES (1, datetime('now'));

CREATE TABLE IF NOT EXISTS timeline_entries (
    entry_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    data_type TEXT NOT NULL,
    content_hash TEXT NOT NULL,

    -- Scoring outcome
    importance_score REAL NOT NULL,
    importance_level TEXT NOT NULL,

    -- Residency
    timeline_category TEXT NOT NULL,
    storage_tier TEXT NOT NULL,
    retention_policy TEXT NOT NULL,

    -- Chronology and access tracking
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,

    -- Snapshot and linkage
    metadata TEXT NOT NULL DEFAULT '{}',
    tags TEXT NOT NULL DEFAULT '[]',
    related_entry_ids TEXT NOT NULL DEFAULT '[]',

    UNIQUE (project_id, event_id)
);

CREATE INDEX IF NOT EXISTS idx_timeline_project ON timeline_entries(project_id);
CREATE INDEX IF NOT EXISTS idx_timeline_hash ON timeline_entries(project_id, content_hash);
CREATE INDEX IF NOT EXISTS idx_timeline_created ON timeline_entries(created_at);
CREATE INDEX IF NOT EXISTS idx_timeline_importance ON timeline_entries(importance_score);
"#;

/// V2: notifications (retained <=30 days) and the feedback ledger
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    notification_id TEXT PRIMARY KEY,
    notification_type TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    level TEXT NOT NULL,
    priority TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    project_id TEXT,
    channels TEXT NOT NULL DEFAULT '[]',
    data TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    read_at TEXT,
    expires_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_notifications_recipient
    ON notifications(recipient_id, created_at);

CREATE TABLE IF NOT EXISTS feedback_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    factor TEXT NOT NULL,
    error REAL NOT NULL,
    predicted REAL NOT NULL,
    actual REAL NOT NULL,
    weights TEXT NOT NULL,
    adjusted_at TEXT NOT NULL
);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: failed-event records keep the original payload for replay
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS failed_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT,
    event_id TEXT,
    payload TEXT NOT NULL,
    stage TEXT NOT NULL,
    error TEXT NOT NULL,
    failed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failed_events_project ON failed_events(project_id);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Highest version recorded in `schema_version`; 0 for a fresh database
/// where the table does not exist yet
pub fn current_version(conn: &rusqlite::Connection) -> u32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Bring the database up to the latest schema
///
/// Returns how many migrations ran.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let from = current_version(conn);
    let mut applied = 0;

    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        tracing::info!(
            version = migration.version,
            "applying migration: {}",
            migration.description
        );
        conn.execute_batch(migration.up)?;
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_migrations_apply_in_order_and_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn), 0);

        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
        assert_eq!(
            current_version(&conn),
            MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
        );

        // Second run is a no-op
        assert_eq!(apply_migrations(&conn).unwrap(), 0);
    }
}
