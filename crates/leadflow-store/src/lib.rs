//! Leadflow Store: durable SQLite implementations of the event log and the
//! task queue.
//!
//! Both collections live in one database but are independent: nothing links
//! a task row to an event row, and no transaction spans the two.

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

mod codec;
pub mod sqlite_event_repository;
pub mod sqlite_task_queue;

pub use sqlite_event_repository::SqliteEventRepository;
pub use sqlite_task_queue::SqliteTaskQueue;

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Opens a pool on `database_url`, creating the database file if needed.
///
/// # Errors
///
/// Returns `sqlx::Error` if the URL is invalid or the database cannot be
/// opened.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}
