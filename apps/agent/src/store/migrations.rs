use libsql::Connection;

use super::StoreError;

/// Create the agent schema if it does not exist yet. Idempotent, run
/// on every `connect()`.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS status_checks (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL,
            http_timeout_seconds INTEGER NOT NULL,
            regions TEXT NOT NULL DEFAULT '[]',
            modified_at TEXT NOT NULL,
            serial INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1
        )",
        "CREATE TABLE IF NOT EXISTS check_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region TEXT NOT NULL,
            check_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            response_code INTEGER NOT NULL,
            response_info TEXT NOT NULL,
            firstbyte_ms INTEGER NOT NULL,
            dns_ms INTEGER NOT NULL,
            tls_ms INTEGER NOT NULL,
            connect_ms INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_check_results_check_time
            ON check_results (check_id, timestamp)",
    ];

    for statement in statements {
        conn.execute(statement, ())
            .await
            .map_err(|e| StoreError::Connection(format!("migration failed: {e}")))?;
    }

    Ok(())
}
