//! Store handle: opening, pragmas and schema checks.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, ErrorCode};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::migrations::{self, REQUIRED_COLUMNS};

/// Persistent metadata store.
///
/// Every mutation is committed before the call returns. One process should
/// write to a store file at a time.
pub struct Store {
    pub(crate) conn: Connection,
    location: PathBuf,
}

impl Store {
    /// Open or create the store at `path`, applying pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        let store = Self::initialize(conn, path.to_path_buf())?;
        info!(path = %path.display(), "Opened metadata store");
        Ok(store)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, PathBuf::from(":memory:"))
    }

    /// Location the store was opened from.
    pub fn path(&self) -> &Path {
        &self.location
    }

    /// Absolute path of the backing file; `None` for an in-memory store.
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.location == Path::new(":memory:") {
            return None;
        }
        Some(std::path::absolute(&self.location).unwrap_or_else(|_| self.location.clone()))
    }

    /// Direct access to the underlying connection for read-only inspection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Schema version recorded in the database.
    pub fn schema_version(&self) -> Result<i64> {
        Ok(migrations::user_version(&self.conn)?)
    }

    fn initialize(conn: Connection, location: PathBuf) -> Result<Self> {
        let mut store = Self { conn, location };
        store.check_integrity()?;
        store.configure_pragmas()?;
        store.check_version()?;

        let applied = migrations::migrate(&mut store.conn)?;
        if !applied.is_empty() {
            info!(versions = ?applied, "Migrated store schema");
        }
        store.check_columns()?;
        Ok(store)
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            path: self.location.clone(),
            reason: reason.into(),
        }
    }

    fn check_integrity(&self) -> Result<()> {
        let verdict: String = match self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
        {
            Ok(verdict) => verdict,
            Err(rusqlite::Error::SqliteFailure(err, message))
                if matches!(err.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) =>
            {
                return Err(self.corrupt(message.unwrap_or_else(|| err.to_string())));
            }
            Err(e) => return Err(e.into()),
        };

        if verdict != "ok" {
            return Err(self.corrupt(format!("integrity check failed: {verdict}")));
        }
        Ok(())
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, full sync)");
        Ok(())
    }

    fn check_version(&self) -> Result<()> {
        let version = migrations::user_version(&self.conn)?;
        let latest = migrations::latest_version();
        if version > latest {
            return Err(self.corrupt(format!(
                "schema version {version} is newer than supported version {latest}"
            )));
        }
        Ok(())
    }

    fn check_columns(&self) -> Result<()> {
        for (table, columns) in REQUIRED_COLUMNS {
            if !migrations::table_exists(&self.conn, table)? {
                return Err(self.corrupt(format!("missing table {table}")));
            }
            for column in *columns {
                if !migrations::column_exists(&self.conn, table, column)? {
                    return Err(self.corrupt(format!("missing column {table}.{column}")));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("location", &self.location).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_is_current() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), migrations::latest_version());
    }

    #[test]
    fn test_missing_column_is_corrupt() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::migrate(&mut conn).unwrap();
        conn.execute_batch("ALTER TABLE run_event DROP COLUMN message;").unwrap();

        let err = Store::initialize(conn, PathBuf::from(":memory:")).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref reason, .. } if reason.contains("run_event.message")));
    }
}
