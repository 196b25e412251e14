use rollcall_core::AttendanceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    #[error("corrupt persisted data: {0}")]
    Corrupt(String),
}

impl From<StoreError> for AttendanceError {
    fn from(err: StoreError) -> Self {
        AttendanceError::Storage(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
