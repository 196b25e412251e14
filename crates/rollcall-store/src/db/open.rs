use super::migrations::apply_migrations;
use crate::error::StoreResult;
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) a database file in WAL mode and migrate it.
pub fn open_db(path: impl AsRef<Path>) -> StoreResult<Connection> {
    let path = path.as_ref();
    let started = Instant::now();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(dir = %parent.display(), error = %e, "could not create database directory");
        }
    }

    let mut conn = Connection::open(path).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "database open failed");
        e
    })?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let journal: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    bootstrap(&mut conn)?;

    tracing::info!(
        path = %path.display(),
        journal = %journal,
        duration_ms = started.elapsed().as_millis() as u64,
        "database opened"
    );
    Ok(conn)
}

/// Open a private in-memory database with the full schema.
pub fn open_db_in_memory() -> StoreResult<Connection> {
    let mut conn = Connection::open_in_memory()?;
    bootstrap(&mut conn)?;
    tracing::debug!("in-memory database opened");
    Ok(conn)
}

fn bootstrap(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)
}
