//! Versioned schema migration runner.
//!
//! A run opens its own session, makes sure the version store exists, reads
//! the current schema version and applies every pending migration from the
//! registry in ascending order. Each migration runs in its own transaction
//! together with the insert of its version record, so the database always
//! sits at some prefix of the registry and never halfway through a single
//! migration. The first failure rolls back that migration and ends the run.
//!
//! Only one runner is expected to touch a database at a time. Nothing here
//! takes a lock against concurrent deployers.

use std::fmt;

use rusqlite::Connection;
use thiserror::Error;

use crate::pool::{open_connection, ConnectionSettings, PoolError};
use crate::registry::{Migration, MigrationRegistry};
use crate::version_store::VersionStore;

/// The step of a migration that was executing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    /// Opening the migration's transaction.
    Begin,
    /// Running the migration's own statements.
    Apply,
    /// Committing the transaction.
    Commit,
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Begin => "begin transaction",
            Self::Apply => "apply",
            Self::Commit => "commit",
        })
    }
}

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The database could not be reached. Not retried.
    #[error("database connection failed: {0}")]
    Connectivity(#[from] PoolError),

    /// A statement within a migration failed; the migration was rolled back.
    #[error("migration {version} ({description}) failed to {step}: {source}")]
    SchemaMutation {
        /// Version of the failing migration.
        version: i64,
        /// Description of the failing migration.
        description: &'static str,
        /// What the runner was doing when it failed.
        step: MigrationStep,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// The version store already holds this version.
    #[error("schema version {0} has already been recorded")]
    DuplicateVersion(i64),

    /// Reading or writing the version store failed.
    #[error("failed to {operation} schema version store: {source}")]
    VersionStore {
        /// The store operation that failed.
        operation: &'static str,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Two registry entries share a version.
    #[error("migration version {0} is defined more than once")]
    DuplicateDefinition(i64),

    /// A registry entry has a version below 1.
    #[error("migration version must be positive, got {0}")]
    InvalidVersion(i64),
}

impl MigrationError {
    fn in_step(migration: &Migration, step: MigrationStep, source: rusqlite::Error) -> Self {
        Self::SchemaMutation {
            version: migration.version,
            description: migration.description,
            step,
            source,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Schema version before the run.
    pub starting_version: i64,
    /// Schema version after the run, as read back from the version store.
    pub final_version: i64,
    /// Versions applied by this run, in the order they were applied.
    pub applied: Vec<i64>,
}

impl MigrationReport {
    /// Number of migrations applied by this run.
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Applies pending migrations from a registry.
pub struct MigrationRunner<'r> {
    registry: &'r MigrationRegistry,
}

impl<'r> MigrationRunner<'r> {
    pub fn new(registry: &'r MigrationRegistry) -> Self {
        Self { registry }
    }

    /// Connects using `settings`, applies all pending migrations and
    /// disconnects.
    ///
    /// The session is dropped on every exit path, including failures.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Connectivity` if the database cannot be
    /// opened, otherwise whatever [`MigrationRunner::run_on`] returns.
    pub fn run(&self, settings: &ConnectionSettings) -> Result<MigrationReport, MigrationError> {
        let mut conn = open_connection(settings).map_err(|e| {
            tracing::error!(database = %settings.name, error = %e, "failed to connect to database");
            MigrationError::from(e)
        })?;
        tracing::info!(database = %settings.name, "database connection established for migration");

        let result = self.run_on(&mut conn);

        drop(conn);
        tracing::info!(database = %settings.name, "database connection closed");

        result
    }

    /// Applies all pending migrations on a session the caller owns.
    ///
    /// # Errors
    ///
    /// Returns the first failure. Migrations committed before it stay
    /// committed; the failing one is rolled back and later ones are not
    /// attempted.
    pub fn run_on(&self, conn: &mut Connection) -> Result<MigrationReport, MigrationError> {
        let store = VersionStore::new(conn);
        store.ensure_exists()?;

        let starting_version = store.current_version()?;
        tracing::info!(version = starting_version, "current schema version");

        let latest = self.registry.latest_version();
        if starting_version > latest {
            tracing::warn!(
                version = starting_version,
                latest,
                "database schema is ahead of the known migrations"
            );
        }

        let mut applied = Vec::new();
        for migration in self.registry.pending(starting_version) {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );

            if let Err(e) = apply_one(conn, migration) {
                tracing::error!(
                    version = migration.version,
                    description = migration.description,
                    error = %e,
                    "migration failed, rolled back"
                );
                return Err(e);
            }

            tracing::info!(version = migration.version, "migration applied successfully");
            applied.push(migration.version);
        }

        let final_version = VersionStore::new(conn).current_version()?;
        tracing::info!(
            version = final_version,
            applied = applied.len(),
            "migration complete"
        );

        Ok(MigrationReport {
            starting_version,
            final_version,
            applied,
        })
    }
}

/// Runs one migration and records it inside a single transaction.
fn apply_one(conn: &mut Connection, migration: &Migration) -> Result<(), MigrationError> {
    let tx = conn
        .transaction()
        .map_err(|e| MigrationError::in_step(migration, MigrationStep::Begin, e))?;

    let outcome = (migration.apply)(&tx)
        .map_err(|e| MigrationError::in_step(migration, MigrationStep::Apply, e))
        .and_then(|()| VersionStore::new(&tx).record(migration.version, migration.description));

    match outcome {
        // A failed commit is rolled back when the transaction drops.
        Ok(()) => tx
            .commit()
            .map_err(|e| MigrationError::in_step(migration, MigrationStep::Commit, e)),
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::warn!(
                    version = migration.version,
                    error = %rollback_err,
                    "explicit rollback failed"
                );
            }
            Err(err)
        }
    }
}

/// Runs all pending built-in migrations on the given session.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// version store cannot be queried.
pub fn run_migrations(conn: &mut Connection) -> Result<MigrationReport, MigrationError> {
    let registry = MigrationRegistry::builtin()?;
    MigrationRunner::new(&registry).run_on(conn)
}
