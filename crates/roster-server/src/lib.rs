//! Roster server library logic.
//!
//! Exposes the router, the shared application state, and the start-up
//! helpers (tracing and database initialization) used by both binaries.

pub mod api;
pub mod config;

use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Extension, Router,
};
use config::{DatabaseConfig, LoggingConfig};
use roster_db::{create_pool, run_migrations, DbPool, MigrationError, PoolError};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Maximum request body size (64 KiB). User payloads are tiny.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
}

/// Installs the global tracing subscriber.
///
/// An unparseable level falls back to `info`. When `logging.file` is set,
/// every event is also written to that file; the returned guard flushes it
/// and must be held for the life of the process. A log file that cannot be
/// opened is reported as a warning and console logging carries on.
pub fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(if logging.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    });

    let mut guard = None;
    let mut file_error = None;
    if let Some(path) = logging.file.as_deref() {
        match file_writer(Path::new(path)) {
            Ok((writer, file_guard)) => {
                let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
                layers.push(if logging.json {
                    file_layer.json().boxed()
                } else {
                    file_layer.boxed()
                });
                guard = Some(file_guard);
            }
            Err(e) => file_error = Some((path, e)),
        }
    }

    tracing_subscriber::registry().with(layers).with(filter).init();

    if let Some((path, error)) = file_error {
        tracing::warn!(path, error = %error, "could not set up file logging");
    }
    guard
}

/// Opens `path` for appending behind a non-blocking writer, creating any
/// missing parent directories.
fn file_writer(path: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(tracing_appender::non_blocking(file))
}

/// Errors raised while preparing the database for the server.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("failed to get database connection for migrations: {0}")]
    Checkout(#[from] r2d2::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Builds the connection pool and, if enabled, applies pending migrations.
///
/// # Errors
///
/// Returns `StartupError` if the pool cannot be built or a migration fails.
pub fn init_database(database: &DatabaseConfig) -> Result<DbPool, StartupError> {
    let pool = create_pool(&database.connection_settings())?;

    if database.migrate_on_startup {
        let mut conn = pool.get()?;
        let report = run_migrations(&mut conn)?;
        if report.applied_count() > 0 {
            tracing::info!(
                count = report.applied_count(),
                version = report.final_version,
                "applied database migrations"
            );
        }
    } else {
        tracing::info!("skipping schema migrations at startup");
    }

    Ok(pool)
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::health_handler))
        .route(
            "/api/users",
            get(api::list_users_handler).post(api::create_user_handler),
        )
        .fallback(api::not_found_handler)
        .method_not_allowed_fallback(api::method_not_allowed_handler)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
