//! Database schema versioning.
//!
//! The schema version is the database's `user_version` pragma. Version 0 is
//! a fresh database; each migration bumps it by one. A version newer than
//! anything listed here belongs to a build we cannot reason about, so opening
//! it is refused rather than guessed at.

use super::Error;
use super::connection::call_with_retry;
use tokio_rusqlite::Connection;

/// Migration list: SQL batches indexed by the version they produce minus one.
///
/// Migrations must be applied in order.
const MIGRATIONS: &[&str] = &[include_str!("../../migrations/001_entries.sql")];

/// Version a fully migrated database reports.
pub const CURRENT_VERSION: i64 = MIGRATIONS.len() as i64;

/// Run any pending migrations.
///
/// Each migration and its version stamp are applied in one transaction.
///
/// # Errors
///
/// Returns `UnsupportedSchemaVersion` when the stored version is negative or
/// newer than [`CURRENT_VERSION`], or a database error if a migration fails.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    call_with_retry(conn, |conn| -> Result<(), Error> {
        let current: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(Error::from)?;

        if !(0..=CURRENT_VERSION).contains(&current) {
            return Err(Error::UnsupportedSchemaVersion(current));
        }

        for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            let version = index as i64 + 1;
            let tx = conn.transaction()?;
            tx.execute_batch(sql)
                .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
            tx.pragma_update(None, "user_version", version)?;
            tx.commit()?;
            tracing::info!(version, "Applied metadata schema migration");
        }

        Ok(())
    })
    .await
}
