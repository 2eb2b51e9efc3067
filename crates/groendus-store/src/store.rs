//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::KvEntry;
use crate::schema;

/// SQLite-backed versioned key-value store.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Fetch the document stored under `key`.
    pub fn get_entry(&self, key: &str) -> Result<Option<KvEntry>> {
        let row = self
            .conn
            .query_row(
                "SELECT key, version, data, updated_at FROM kv_store WHERE key = ?1",
                [key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(key, version, data, updated_at)| {
            Ok(KvEntry {
                key,
                version,
                data,
                updated_at: OffsetDateTime::from_unix_timestamp(updated_at)
                    .map_err(|_| Error::InvalidTimestamp(updated_at))?,
            })
        })
        .transpose()
    }

    /// Write `data` under `key`, replacing any previous document.
    ///
    /// A single statement, so readers see either the old or the new
    /// document, never a mix.
    pub fn put_entry(&self, key: &str, version: i64, data: &serde_json::Value) -> Result<()> {
        let encoded = serde_json::to_string(data)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        debug!("Writing {} ({} bytes, version {})", key, encoded.len(), version);

        self.conn.execute(
            "INSERT INTO kv_store (key, version, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                version = excluded.version,
                data = excluded.data,
                updated_at = excluded.updated_at",
            rusqlite::params![key, version, encoded, now],
        )?;
        Ok(())
    }

    /// All stored keys, sorted.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv_store ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Store raw text under `key`, bypassing JSON encoding.
    #[cfg(test)]
    pub(crate) fn put_raw(&self, key: &str, version: i64, data: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, version, data, updated_at) VALUES (?1, ?2, ?3, 0)",
            rusqlite::params![key, version, data],
        )?;
        Ok(())
    }
}
