//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite metadata database, applying the
//! pragmas needed for concurrent access from several processes (WAL mode and
//! a busy timeout), and running migrations.

use super::migrations;
use crate::Error;
use std::path::Path;
use std::time::Duration;
use tokio_rusqlite::{Connection, rusqlite};

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;";

/// Busy timeout used when the caller does not pick one.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause before re-running a statement that found the database locked.
const BUSY_BACKOFF_START: Duration = Duration::from_millis(10);
const BUSY_BACKOFF_MAX: Duration = Duration::from_millis(500);

/// Metadata store handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread, so statements from one cache instance are
/// serialized. Contention with other processes never reaches the caller:
/// SQLite's busy handler waits up to the busy timeout, and a statement that
/// still finds the database locked is re-run after a backoff.
#[derive(Clone, Debug)]
pub struct MetadataStore {
    pub(crate) conn: Connection,
}

impl MetadataStore {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::configure(conn, busy_timeout).await
    }

    /// Open an in-memory database for testing.
    ///
    /// Creates a temporary in-memory SQLite database with the same
    /// pragma configuration as file-based databases.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::configure(conn, DEFAULT_BUSY_TIMEOUT).await
    }

    async fn configure(conn: Connection, busy_timeout: Duration) -> Result<Self, Error> {
        call_with_retry(&conn, move |conn| -> Result<(), Error> {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }

    /// Run `function` on the connection thread, re-running it while the
    /// database is locked by another connection.
    pub(crate) async fn call<R, F>(&self, function: F) -> Result<R, Error>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, Error> + Clone + Send + 'static,
        R: Send + 'static,
    {
        call_with_retry(&self.conn, function).await
    }
}

/// Run `function` on `conn`, retrying with exponential backoff for as long as
/// SQLite reports the database busy or locked.
pub(crate) async fn call_with_retry<R, F>(conn: &Connection, function: F) -> Result<R, Error>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, Error> + Clone + Send + 'static,
    R: Send + 'static,
{
    let mut backoff = BUSY_BACKOFF_START;
    let mut retries = 0u32;

    loop {
        match conn.call(function.clone()).await.map_err(Error::from) {
            Err(e) if e.is_busy() => {
                retries += 1;
                tracing::debug!(retries, backoff_ms = backoff.as_millis() as u64, "Metadata store busy, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(BUSY_BACKOFF_MAX);
            }
            result => return result,
        }
    }
}
