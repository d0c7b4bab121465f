//! Versioned schema for the local store.
//!
//! SQL files under `migrations/` are compiled in and applied in order, each
//! inside its own transaction. Applied versions are recorded in
//! `schema_version`.

use rusqlite::Connection;

use crate::db::DbError;

const MIGRATIONS: &[(i32, &str)] = &[
    (1, include_str!("migrations/001_baseline.sql")),
    (2, include_str!("migrations/002_kv_scope_index.sql")),
];

fn latest_known() -> i32 {
    MIGRATIONS.last().map(|(version, _)| *version).unwrap_or(0)
}

fn applied_version(conn: &Connection) -> Result<i32, DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Hot copy next to the database file before touching an existing schema.
fn snapshot_file(conn: &Connection) -> Result<(), DbError> {
    let path = match conn.path() {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => return Ok(()),
    };
    let target = format!("{}.pre-migration.bak", path);
    let mut copy = Connection::open(&target)?;
    rusqlite::backup::Backup::new(conn, &mut copy)?.step(-1)?;
    log::info!("Saved pre-migration copy to {}", target);
    Ok(())
}

/// Bring the schema up to date. Returns how many migrations ran.
pub fn run_migrations(conn: &Connection) -> Result<usize, DbError> {
    let current = applied_version(conn)?;
    let supported = latest_known();
    if current > supported {
        return Err(DbError::SchemaTooNew {
            found: current,
            supported,
        });
    }

    let pending: Vec<&(i32, &str)> = MIGRATIONS.iter().filter(|(v, _)| *v > current).collect();
    if pending.is_empty() {
        return Ok(0);
    }
    if current > 0 {
        snapshot_file(conn)?;
    }

    for &&(version, sql) in &pending {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .and_then(|_| tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version]))
            .map_err(|source| DbError::Migration { version, source })?;
        tx.commit()?;
        log::info!("Schema migrated to v{}", version);
    }
    Ok(pending.len())
}
