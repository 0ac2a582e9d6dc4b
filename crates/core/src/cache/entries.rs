//! Freshness record CRUD operations.
//!
//! Every operation is a single statement, so each one is atomic on its own.
//! Choosing between `insert` and `update` is the caller's job.

use std::future::Future;

use super::connection::MetadataStore;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Freshness metadata for one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FreshnessRecord {
    /// `max-age` the server sent with the last response, 0 when absent.
    pub default_age: i64,
    /// Freshness window actually applied, in seconds.
    pub age: i64,
    /// Epoch seconds of the fetch that started the window.
    pub life_start_ts: i64,
}

impl FreshnessRecord {
    /// Last epoch second at which the entry still counts as fresh.
    pub fn expires_at(&self) -> i64 {
        self.life_start_ts.saturating_add(self.age)
    }

    pub fn is_fresh(&self, now: i64) -> bool {
        now <= self.expires_at()
    }
}

impl MetadataStore {
    /// Get the record for `key`.
    ///
    /// Returns None if the key doesn't exist in the store.
    pub async fn lookup(&self, key: &str) -> Result<Option<FreshnessRecord>, Error> {
        let key = key.to_string();
        self.call(move |conn| -> Result<Option<FreshnessRecord>, Error> {
            let mut stmt = conn.prepare("SELECT default_age, age, life_start_ts FROM entries WHERE key = ?1")?;

            let result = stmt.query_row(params![key], |row| {
                Ok(FreshnessRecord { default_age: row.get(0)?, age: row.get(1)?, life_start_ts: row.get(2)? })
            });

            match result {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Insert a record for a key that has none yet.
    pub async fn insert(&self, key: &str, record: FreshnessRecord) -> Result<(), Error> {
        let key = key.to_string();
        self.call(move |conn| -> Result<(), Error> {
            conn.execute(
                "INSERT INTO entries (key, default_age, age, life_start_ts) VALUES (?1, ?2, ?3, ?4)",
                params![key, record.default_age, record.age, record.life_start_ts],
            )?;
            Ok(())
        })
        .await
    }

    /// Overwrite the record of an existing key.
    ///
    /// Returns false if there was no row to update.
    pub async fn update(&self, key: &str, record: FreshnessRecord) -> Result<bool, Error> {
        let key = key.to_string();
        self.call(move |conn| -> Result<bool, Error> {
            let changed = conn.execute(
                "UPDATE entries SET default_age = ?2, age = ?3, life_start_ts = ?4 WHERE key = ?1",
                params![key, record.default_age, record.age, record.life_start_ts],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Delete the record for `key`. Deleting a missing key is not an error.
    pub async fn remove(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.call(move |conn| -> Result<(), Error> {
            conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    /// Keys whose freshness window closed before `now`.
    pub async fn expired_keys(&self, now: i64) -> Result<Vec<String>, Error> {
        self.call(move |conn| -> Result<Vec<String>, Error> {
            let mut stmt = conn.prepare("SELECT key FROM entries WHERE ?1 > life_start_ts + age ORDER BY key")?;
            let keys = stmt
                .query_map(params![now], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }

    /// Delete the record for `key` only if it is still expired at `now`.
    ///
    /// Returns false when the row is gone or was refreshed in the meantime.
    pub async fn remove_if_expired(&self, key: &str, now: i64) -> Result<bool, Error> {
        let key = key.to_string();
        self.call(move |conn| -> Result<bool, Error> {
            let count = conn.execute(
                "DELETE FROM entries WHERE key = ?1 AND ?2 > life_start_ts + age",
                params![key, now],
            )?;
            Ok(count > 0)
        })
        .await
    }

    /// Delete expired records whose files could be removed.
    ///
    /// `delete_file` is called once per expired key and must report whether
    /// the backing file is gone. Rows whose file could not be deleted are
    /// kept for a later sweep. Returns the number of deleted rows.
    pub async fn sweep_expired<F, Fut>(&self, now: i64, mut delete_file: F) -> Result<u64, Error>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut removed = 0u64;

        for key in self.expired_keys(now).await? {
            if !delete_file(key.clone()).await {
                tracing::debug!(key = %key, "Keeping expired entry whose file could not be removed");
                continue;
            }
            if self.remove_if_expired(&key, now).await? {
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Delete every record.
    pub async fn clear(&self) -> Result<u64, Error> {
        self.call(move |conn| -> Result<u64, Error> {
            let count = conn.execute("DELETE FROM entries", [])?;
            Ok(count as u64)
        })
        .await
    }

    /// Number of records.
    pub async fn count(&self) -> Result<u64, Error> {
        self.call(move |conn| -> Result<u64, Error> {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}
