//! SQLite persistence layer.
//!
//! Parameterized queries exclusively, no SQL string concatenation.
//! Every card write runs inside its own transaction so a failing
//! record never leaves partial rows behind.

pub mod queries;
pub mod schema;
pub mod upsert;

use std::path::Path;

use chrono::{Duration, Local};
use rusqlite::{params, Connection};

use crate::error::PersistenceError;

pub use schema::init_schema;
pub use upsert::{
    upsert_card, ChangeSet, ConflictPolicy, FieldChange, UpsertAction, UpsertOptions,
    UpsertOutcome,
};

/// Result type for database operations
pub type DbResult<T> = rusqlite::Result<T>;

/// Open (or create) the catalog store at `path` and make sure the
/// schema exists.
pub fn open_store(path: &Path) -> DbResult<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    schema::init_schema(&conn)?;
    log::debug!("opened catalog store at {}", path.display());
    Ok(conn)
}

/// In-memory store with the full schema, for tests and dry experiments.
pub fn open_memory_store() -> DbResult<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    schema::init_schema(&conn)?;
    Ok(conn)
}

// Cascading deletes depend on the foreign_keys pragma, which SQLite
// scopes to the connection.
fn configure(conn: &Connection) -> DbResult<()> {
    conn.pragma_update(None, "foreign_keys", true)
}

const LOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Leases older than this count as abandoned (a crashed run never
/// releases) and may be taken over.
const LOCK_STALE_AFTER_HOURS: i64 = 1;

/// Claim the single-row run lease. Succeeds if no run holds it or the
/// holder's lease has gone stale; otherwise reports who holds it.
pub fn try_acquire_run_lock(conn: &Connection, holder: &str) -> Result<(), PersistenceError> {
    let now = Local::now();
    let stale_cutoff = now - Duration::hours(LOCK_STALE_AFTER_HOURS);
    let claimed = conn.execute(
        "INSERT INTO sync_lock (id, holder, acquired_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET holder = excluded.holder,
                                       acquired_at = excluded.acquired_at
         WHERE sync_lock.acquired_at < ?3",
        params![
            holder,
            now.format(LOCK_TIME_FORMAT).to_string(),
            stale_cutoff.format(LOCK_TIME_FORMAT).to_string(),
        ],
    )?;
    if claimed == 1 {
        return Ok(());
    }

    let (holder, since) = conn
        .query_row(
            "SELECT holder, acquired_at FROM sync_lock WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap_or_else(|_| ("unknown".to_string(), "unknown".to_string()));
    Err(PersistenceError::RunLocked { holder, since })
}

/// Release the lease if we still hold it. A takeover by another run
/// leaves their lease alone.
pub fn release_run_lock(conn: &Connection, holder: &str) -> DbResult<()> {
    conn.execute(
        "DELETE FROM sync_lock WHERE id = 1 AND holder = ?1",
        params![holder],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_then_release_roundtrips() {
        let conn = open_memory_store().unwrap();
        try_acquire_run_lock(&conn, "run-a").unwrap();
        release_run_lock(&conn, "run-a").unwrap();
        try_acquire_run_lock(&conn, "run-b").unwrap();
    }

    #[test]
    fn second_acquire_reports_the_holder() {
        let conn = open_memory_store().unwrap();
        try_acquire_run_lock(&conn, "run-a").unwrap();

        let err = try_acquire_run_lock(&conn, "run-b").unwrap_err();
        match err {
            PersistenceError::RunLocked { holder, .. } => assert_eq!(holder, "run-a"),
            other => panic!("expected RunLocked, got {other:?}"),
        }
    }

    #[test]
    fn stale_lease_is_taken_over() {
        let conn = open_memory_store().unwrap();
        conn.execute(
            "INSERT INTO sync_lock (id, holder, acquired_at)
             VALUES (1, 'crashed-run', '2020-01-01 00:00:00')",
            [],
        )
        .unwrap();

        try_acquire_run_lock(&conn, "run-b").unwrap();
        let holder: String = conn
            .query_row("SELECT holder FROM sync_lock WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(holder, "run-b");
    }

    #[test]
    fn release_ignores_leases_held_by_others() {
        let conn = open_memory_store().unwrap();
        try_acquire_run_lock(&conn, "run-a").unwrap();
        release_run_lock(&conn, "run-b").unwrap();

        // run-a still holds the lease.
        assert!(try_acquire_run_lock(&conn, "run-c").is_err());
    }
}
