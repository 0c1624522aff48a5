//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize or migrate the schema
///
/// # Errors
///
/// Returns error if schema creation fails
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS violations (
            id TEXT PRIMARY KEY,
            plate TEXT NOT NULL,
            vehicle_class TEXT NOT NULL,
            crime_types TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            evidence_url TEXT NOT NULL,
            owner_name TEXT,
            owner_address TEXT,
            owner_phone TEXT,
            owner_email TEXT,
            vehicle_model TEXT,
            fine_breakdown TEXT NOT NULL,
            total_fine INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_violations_plate ON violations(plate);
        CREATE INDEX IF NOT EXISTS idx_violations_created_at ON violations(created_at);",
    )?;

    let existing: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    if existing.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
    }

    Ok(())
}
