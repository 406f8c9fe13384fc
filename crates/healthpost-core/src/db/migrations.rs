//! Database migrations

use crate::error::Result;
use libsql::Connection;

use super::connection::Schema;

/// Run all pending migrations for the given schema
pub async fn run(conn: &Connection, schema: Schema) -> Result<()> {
    let version = get_version(conn).await?;

    match schema {
        Schema::Device => {
            if version < 1 {
                apply(conn, 1, DEVICE_V1).await?;
            }
        }
        Schema::Canonical => {
            if version < 1 {
                apply(conn, 1, CANONICAL_V1).await?;
            }
        }
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Device schema: optimistic record copies plus the pending operation queue.
const DEVICE_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS local_inventory (
        local_id INTEGER PRIMARY KEY AUTOINCREMENT,
        server_id INTEGER UNIQUE,
        data TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS local_patients (
        local_id INTEGER PRIMARY KEY AUTOINCREMENT,
        server_id INTEGER UNIQUE,
        data TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    // AUTOINCREMENT keeps local ids monotonic so insertion order survives deletes
    "CREATE TABLE IF NOT EXISTS sync_queue (
        local_id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation TEXT NOT NULL,
        entity TEXT NOT NULL,
        target_id INTEGER,
        payload TEXT,
        idempotency_key TEXT NOT NULL,
        subject_local_id INTEGER,
        revert_snapshot TEXT,
        created_at INTEGER NOT NULL
    )",
];

/// Canonical server schema.
const CANONICAL_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS inventory (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        stock INTEGER NOT NULL CHECK (stock >= 0),
        threshold INTEGER NOT NULL CHECK (threshold >= 0),
        expiry_date TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_inventory_created ON inventory(created_at DESC)",
    "CREATE TABLE IF NOT EXISTS patients (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('maternal', 'child')),
        details TEXT NOT NULL,
        medicine_id INTEGER REFERENCES inventory(id) ON DELETE SET NULL,
        quantity INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_patients_owner ON patients(owner_user_id, created_at DESC)",
    "CREATE TABLE IF NOT EXISTS applied_operations (
        owner_user_id TEXT NOT NULL,
        client_op_id TEXT NOT NULL,
        entity TEXT NOT NULL,
        operation TEXT NOT NULL,
        record_id INTEGER NOT NULL,
        applied_at INTEGER NOT NULL,
        PRIMARY KEY (owner_user_id, client_op_id)
    )",
];

/// Apply one migration step atomically and record its version
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {}", version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn raw_connection() -> (libsql::Database, Connection) {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();
        (db, conn)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn migrations_are_idempotent() {
        let (_db, conn) = raw_connection().await;
        run(&conn, Schema::Device).await.unwrap();
        run(&conn, Schema::Device).await.unwrap();
        assert_eq!(get_version(&conn).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn canonical_schema_rejects_negative_stock() {
        let (_db, conn) = raw_connection().await;
        run(&conn, Schema::Canonical).await.unwrap();

        let result = conn
            .execute(
                "INSERT INTO inventory (name, stock, threshold, expiry_date, created_at, updated_at)
                 VALUES ('ORS', -1, 0, '2026-01-01', 0, 0)",
                (),
            )
            .await;
        assert!(result.is_err());
    }
}
