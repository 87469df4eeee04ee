//! Durable record of which schema versions have been applied.
//!
//! The store lives in the `schema_migrations` table. Rows are only ever
//! inserted, one per successfully committed migration.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection};

use crate::migrations::MigrationError;

/// Name of the version-tracking table.
pub const VERSION_TABLE: &str = "schema_migrations";

/// One applied migration as recorded in the version store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersionRecord {
    /// Surrogate key.
    pub id: i64,
    /// The applied migration version.
    pub version: i64,
    /// Description recorded at apply time.
    pub description: String,
    /// RFC 3339 timestamp of when the migration committed.
    pub applied_at: String,
}

/// Reads and writes the version-tracking table through a borrowed session.
///
/// Inside a migration the session is the migration's transaction, so a
/// recorded version commits or rolls back with the schema change itself.
pub struct VersionStore<'c> {
    conn: &'c Connection,
}

impl<'c> VersionStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Creates the tracking table if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::VersionStore` if the DDL fails.
    pub fn ensure_exists(&self) -> Result<(), MigrationError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    version INTEGER NOT NULL UNIQUE,
                    description TEXT NOT NULL,
                    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                );",
            )
            .map_err(|source| MigrationError::VersionStore {
                operation: "create",
                source,
            })
    }

    /// Returns the highest recorded version, or 0 when nothing has been applied.
    ///
    /// A missing tracking table is the normal state of a fresh database and
    /// also reports 0.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::VersionStore` if the table exists but cannot
    /// be read.
    pub fn current_version(&self) -> Result<i64, MigrationError> {
        let read_error = |source: rusqlite::Error| MigrationError::VersionStore {
            operation: "read",
            source,
        };

        let exists: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [VERSION_TABLE],
                |row| row.get(0),
            )
            .map_err(read_error)?;

        if !exists {
            return Ok(0);
        }

        let version: Option<i64> = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .map_err(read_error)?;

        Ok(version.unwrap_or(0))
    }

    /// Records `version` as applied, stamped with the current UTC time.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::DuplicateVersion` if the version is already
    /// recorded, or `MigrationError::VersionStore` for any other failure.
    pub fn record(&self, version: i64, description: &str) -> Result<(), MigrationError> {
        let applied_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        match self.conn.execute(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![version, description, applied_at],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(MigrationError::DuplicateVersion(version))
            }
            Err(source) => Err(MigrationError::VersionStore {
                operation: "record",
                source,
            }),
        }
    }

    /// Lists every applied migration in ascending version order.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::VersionStore` on SQL failure, including when
    /// the table does not exist.
    pub fn applied(&self) -> Result<Vec<SchemaVersionRecord>, MigrationError> {
        let read_error = |source: rusqlite::Error| MigrationError::VersionStore {
            operation: "list",
            source,
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, version, description, applied_at
                 FROM schema_migrations ORDER BY version ASC",
            )
            .map_err(read_error)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SchemaVersionRecord {
                    id: row.get(0)?,
                    version: row.get(1)?,
                    description: row.get(2)?,
                    applied_at: row.get(3)?,
                })
            })
            .map_err(read_error)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(read_error)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_version_is_zero_without_table() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let store = VersionStore::new(&conn);
        assert_eq!(store.current_version().unwrap(), 0);
    }

    #[test]
    fn ensure_exists_is_idempotent() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let store = VersionStore::new(&conn);
        store.ensure_exists().expect("first create should succeed");
        store.ensure_exists().expect("second create should be a no-op");
        assert_eq!(store.current_version().unwrap(), 0);
    }

    #[test]
    fn current_version_is_highest_recorded() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let store = VersionStore::new(&conn);
        store.ensure_exists().unwrap();

        store.record(2, "second").unwrap();
        store.record(1, "first").unwrap();

        assert_eq!(store.current_version().unwrap(), 2);
    }

    #[test]
    fn recording_a_version_twice_fails() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let store = VersionStore::new(&conn);
        store.ensure_exists().unwrap();

        store.record(2, "add status").expect("first record should succeed");
        let err = store
            .record(2, "add status")
            .expect_err("second record should violate uniqueness");
        assert!(matches!(err, MigrationError::DuplicateVersion(2)));

        assert_eq!(store.applied().unwrap().len(), 1);
    }

    #[test]
    fn applied_lists_records_in_version_order() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let store = VersionStore::new(&conn);
        store.ensure_exists().unwrap();

        store.record(3, "three").unwrap();
        store.record(1, "one").unwrap();

        let records = store.applied().unwrap();
        let versions: Vec<i64> = records.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 3]);
        assert_eq!(records[0].description, "one");
        assert!(!records[0].applied_at.is_empty());
    }
}
