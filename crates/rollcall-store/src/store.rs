use crate::db::{open_db, open_db_in_memory};
use crate::error::StoreResult;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Handle to one SQLite connection.
///
/// Several `Store`s (in this process or others) may share one database file.
/// The mutex only serializes use of this handle's connection; every ledger
/// invariant is enforced by the schema and by immediate transactions.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite consistent; the guard is reusable.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
