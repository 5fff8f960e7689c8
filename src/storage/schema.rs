//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            summary TEXT NOT NULL,
            severity TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            services_json TEXT NOT NULL,
            errors_json TEXT NOT NULL,
            root_cause TEXT,
            signals_json TEXT NOT NULL,
            resolved_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS remediation_actions (
            id TEXT PRIMARY KEY,
            incident_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            action_type TEXT NOT NULL,
            target_service TEXT NOT NULL,
            description TEXT NOT NULL,
            reasoning TEXT,
            executed_at TEXT NOT NULL,
            success INTEGER NOT NULL,
            validated INTEGER,
            FOREIGN KEY (incident_id) REFERENCES incidents(id)
        );

        CREATE TABLE IF NOT EXISTS post_mortems (
            incident_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body_json TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            FOREIGN KEY (incident_id) REFERENCES incidents(id)
        );

        CREATE TABLE IF NOT EXISTS memory_documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_incidents_detected ON incidents(detected_at);
        CREATE INDEX IF NOT EXISTS idx_actions_incident ON remediation_actions(incident_id, seq);
        CREATE INDEX IF NOT EXISTS idx_memory_created ON memory_documents(created_at);",
    )?;

    Ok(())
}
