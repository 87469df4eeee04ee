//! Applies pending schema migrations, then the data migration pass.
//!
//! Usage: `roster-migrate [config.toml]`. Connection parameters come from the
//! same configuration file and `ROSTER_DB_*` environment variables as the
//! server. Exits non-zero after logging the error if anything fails.

use roster_db::{
    run_data_migrations, DataMigrationError, MigrationError, MigrationRegistry, MigrationRunner,
};
use roster_server::config::{self, Config};
use roster_server::init_tracing;
use std::process::ExitCode;
use thiserror::Error;

#[derive(Debug, Error)]
enum MigrateError {
    #[error("database '{0}' is in-memory; migrations would be lost when the connection closes")]
    InMemoryDatabase(String),
    #[error("schema migration failed: {0}")]
    Schema(#[from] MigrationError),
    #[error("data migration failed: {0}")]
    Data(#[from] DataMigrationError),
}

fn migrate(config: &Config) -> Result<(), MigrateError> {
    let settings = config.database.connection_settings();
    if settings.is_in_memory() {
        return Err(MigrateError::InMemoryDatabase(settings.name));
    }
    let registry = MigrationRegistry::builtin()?;

    let report = MigrationRunner::new(&registry).run(&settings)?;
    tracing::info!(
        from = report.starting_version,
        to = report.final_version,
        applied = report.applied_count(),
        "schema migrations finished"
    );

    if config.database.run_data_migrations {
        run_data_migrations(&settings)?;
    } else {
        tracing::info!("data migrations disabled, skipping");
    }

    Ok(())
}

fn main() -> ExitCode {
    let (resolved_config_path, config_source) = config::resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = match config::load_config(selected_config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_tracing(&config.logging);
    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        database = %config.database.name,
        "starting database migration"
    );

    match migrate(&config) {
        Ok(()) => {
            tracing::info!("all migrations completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "migration process failed");
            ExitCode::FAILURE
        }
    }
}
