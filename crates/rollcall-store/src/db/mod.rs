//! SQLite connection bootstrap and schema migrations.
//!
//! Schema version is tracked in `PRAGMA user_version`. Nothing reads or
//! writes application tables before migrations have been applied.

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};
