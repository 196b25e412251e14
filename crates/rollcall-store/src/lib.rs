//! rollcall-store: SQLite persistence for Rollcall.
//!
//! A [`Store`] owns one connection to a database file shared by every
//! process that records attendance. Uniqueness of attendance records and
//! notifications lives in the schema (composite primary key, partial unique
//! indexes); writers use immediate transactions so the session-open check
//! and the write cannot interleave with another writer.

mod attendance;
mod codec;
pub mod db;
mod directory;
mod error;
mod notifications;
mod sessions;
mod store;

pub use attendance::{AbsenceOutcome, Amendment, RecordWrite};
pub use error::{StoreError, StoreResult};
pub use store::Store;
