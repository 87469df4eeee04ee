//! Database layer for Roster.
//!
//! Provides SQLite connection settings and pooling (via `r2d2`), WAL-mode
//! initialization, and the schema migration engine. Every table Roster uses
//! is created through versioned migrations managed by this crate.
//!
//! # Migration engine
//!
//! - [`MigrationRegistry`]: the explicit, ordered list of migrations.
//! - [`VersionStore`]: the `schema_migrations` table recording what ran.
//! - [`MigrationRunner`]: applies pending migrations one transaction each.
//! - [`run_data_migrations`]: an unversioned pass of one-off data fixes.
//!
//! Runs are strictly sequential and assume a single runner per database.

mod data_migrations;
mod migrations;
mod pool;
mod registry;
mod version_store;

pub use data_migrations::{
    run_data_migrations, run_data_migrations_on, DataMigration, DataMigrationError,
    DATA_MIGRATIONS,
};
pub use migrations::{
    run_migrations, MigrationError, MigrationReport, MigrationRunner, MigrationStep,
};
pub use pool::{create_pool, open_connection, ConnectionSettings, DbPool, PoolError};
pub use registry::{ApplyFn, Migration, MigrationRegistry};
pub use version_store::{SchemaVersionRecord, VersionStore, VERSION_TABLE};
