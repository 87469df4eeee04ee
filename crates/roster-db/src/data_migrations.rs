//! One-off data transformations that run outside the versioned mechanism.
//!
//! Nothing records that a data migration ran, so every invocation executes
//! every statement again. The built-in statement bumps test users' ages and
//! is therefore not idempotent: running it twice increments twice.

use rusqlite::Connection;
use thiserror::Error;

use crate::pool::{open_connection, ConnectionSettings, PoolError};

/// A named data-transformation statement.
#[derive(Debug, Clone, Copy)]
pub struct DataMigration {
    /// Short name used in logs and errors.
    pub name: &'static str,
    /// A single DML statement.
    pub sql: &'static str,
}

/// The data migrations executed by [`run_data_migrations`].
pub const DATA_MIGRATIONS: &[DataMigration] = &[DataMigration {
    name: "increment_test_user_ages",
    sql: "UPDATE users
          SET age = age + 1, updated_at = CURRENT_TIMESTAMP
          WHERE email LIKE 'test%@example.com'
          AND age IS NOT NULL",
}];

/// Errors that can occur during a data migration pass.
#[derive(Debug, Error)]
pub enum DataMigrationError {
    /// The database could not be reached.
    #[error("database connection failed: {0}")]
    Connectivity(#[from] PoolError),

    /// A data statement failed; the pass was rolled back.
    #[error("data migration '{name}' failed: {source}")]
    Statement {
        /// Name of the failing statement.
        name: &'static str,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Opening or committing the transaction failed.
    #[error("data migration transaction failed: {0}")]
    Transaction(rusqlite::Error),
}

/// Connects using `settings`, runs [`DATA_MIGRATIONS`] and disconnects.
///
/// Uses its own session, independent of any schema migration run.
///
/// # Errors
///
/// Returns `DataMigrationError` if the database cannot be reached or any
/// statement fails.
pub fn run_data_migrations(settings: &ConnectionSettings) -> Result<usize, DataMigrationError> {
    tracing::info!("running data migrations");

    let mut conn = open_connection(settings)?;
    let result = run_data_migrations_on(&mut conn, DATA_MIGRATIONS);
    drop(conn);
    tracing::debug!(database = %settings.name, "database connection closed");

    result
}

/// Runs `migrations` in one transaction on a session the caller owns.
///
/// Commits only when at least one row changed; a pass that touches nothing
/// is rolled back. Returns the total number of affected rows.
///
/// # Errors
///
/// Returns `DataMigrationError::Statement` for the first failing statement,
/// after rolling back everything the pass did.
pub fn run_data_migrations_on(
    conn: &mut Connection,
    migrations: &[DataMigration],
) -> Result<usize, DataMigrationError> {
    let tx = conn.transaction().map_err(DataMigrationError::Transaction)?;

    let mut updated = 0;
    for migration in migrations {
        match tx.execute(migration.sql, []) {
            Ok(rows) => {
                tracing::info!(migration = migration.name, rows, "data migration executed");
                updated += rows;
            }
            Err(source) => {
                tracing::error!(
                    migration = migration.name,
                    error = %source,
                    "data migration failed, rolling back"
                );
                if let Err(e) = tx.rollback() {
                    tracing::warn!(error = %e, "explicit rollback failed");
                }
                return Err(DataMigrationError::Statement {
                    name: migration.name,
                    source,
                });
            }
        }
    }

    if updated > 0 {
        tx.commit().map_err(DataMigrationError::Transaction)?;
        tracing::info!(count = updated, "updated records");
    } else {
        tx.rollback().map_err(DataMigrationError::Transaction)?;
        tracing::info!("no records to update");
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;

    fn migrated_db() -> Connection {
        let mut conn = Connection::open_in_memory().expect("should open in-memory db");
        run_migrations(&mut conn).expect("migrations should succeed");
        conn
    }

    fn age_of(conn: &Connection, email: &str) -> Option<i64> {
        conn.query_row("SELECT age FROM users WHERE email = ?1", [email], |row| {
            row.get(0)
        })
        .expect("user should exist")
    }

    #[test]
    fn increments_only_matching_test_users() {
        let mut conn = migrated_db();
        conn.execute_batch(
            "INSERT INTO users (name, email, age) VALUES ('Test One', 'test1@example.com', 20);
             INSERT INTO users (name, email, age) VALUES ('Test Null', 'test2@example.com', NULL);
             INSERT INTO users (name, email, age) VALUES ('Real', 'real@example.com', 40);",
        )
        .unwrap();

        let updated = run_data_migrations_on(&mut conn, DATA_MIGRATIONS).unwrap();
        assert_eq!(updated, 1);

        assert_eq!(age_of(&conn, "test1@example.com"), Some(21));
        assert_eq!(age_of(&conn, "test2@example.com"), None);
        assert_eq!(age_of(&conn, "real@example.com"), Some(40));
    }

    #[test]
    fn rerunning_increments_again() {
        let mut conn = migrated_db();
        conn.execute(
            "INSERT INTO users (name, email, age) VALUES ('Test', 'test@example.com', 30)",
            [],
        )
        .unwrap();

        run_data_migrations_on(&mut conn, DATA_MIGRATIONS).unwrap();
        run_data_migrations_on(&mut conn, DATA_MIGRATIONS).unwrap();

        assert_eq!(age_of(&conn, "test@example.com"), Some(32));
    }

    #[test]
    fn no_matching_rows_is_a_no_op() {
        let mut conn = migrated_db();
        let updated = run_data_migrations_on(&mut conn, DATA_MIGRATIONS).unwrap();
        assert_eq!(updated, 0);
    }

    #[test]
    fn failure_rolls_back_earlier_statements() {
        let mut conn = migrated_db();
        conn.execute(
            "INSERT INTO users (name, email, age) VALUES ('Test', 'test@example.com', 30)",
            [],
        )
        .unwrap();

        let migrations = [
            DATA_MIGRATIONS[0],
            DataMigration {
                name: "broken",
                sql: "UPDATE no_such_table SET x = 1",
            },
        ];

        let err = run_data_migrations_on(&mut conn, &migrations).unwrap_err();
        assert!(matches!(
            err,
            DataMigrationError::Statement { name: "broken", .. }
        ));
        assert_eq!(age_of(&conn, "test@example.com"), Some(30));
    }
}
