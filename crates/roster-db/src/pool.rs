//! Connection settings, single-session connections, and pool creation.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::fmt;
use thiserror::Error;

/// Parameters for reaching the database.
///
/// The embedded SQLite engine only consumes `name`, which is the path to the
/// database file (`:memory:` opens a private in-memory database). `host`,
/// `port`, `user` and `password` are carried as opaque credentials so a
/// deployment keeps one set of connection parameters; they show up in logs
/// as connection context and the password is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name. For SQLite, the database file path.
    pub name: String,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: String,
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Maximum number of pooled connections.
    pub pool_max_size: u32,
}

impl ConnectionSettings {
    /// Settings for a private in-memory database, mostly useful in tests.
    pub fn in_memory() -> Self {
        Self {
            name: ":memory:".to_string(),
            ..Self::default()
        }
    }

    /// Whether every connection opened from these settings gets its own
    /// private database that vanishes when the connection closes.
    pub fn is_in_memory(&self) -> bool {
        let name = self.name.trim();
        name.is_empty() || name == ":memory:"
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "roster.db".to_string(),
            user: "roster".to_string(),
            password: String::new(),
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field("pool_max_size", &self.pool_max_size)
            .finish()
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when opening connections or building the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),

    /// Failed to open a single database session.
    #[error("failed to connect to database '{database}': {source}")]
    Connect {
        /// The database that could not be reached.
        database: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },
}

fn open_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX
}

/// Applies WAL mode, foreign keys and the busy timeout to a fresh connection.
fn configure_connection(conn: &Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    // In-memory databases report "memory" which is expected and acceptable.
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!(
                "failed to set WAL journal mode, got: {}",
                journal_mode
            )),
        ));
    }
    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {};",
        busy_timeout_ms
    ))
}

/// Opens a single, unpooled database session.
///
/// The migration runners own their session for the duration of a run and
/// release it by dropping it, so they connect through here rather than
/// borrowing from a pool. No retry is attempted.
///
/// # Errors
///
/// Returns `PoolError::Connect` if the database cannot be opened or configured.
pub fn open_connection(settings: &ConnectionSettings) -> Result<Connection, PoolError> {
    tracing::debug!(
        host = %settings.host,
        port = settings.port,
        database = %settings.name,
        user = %settings.user,
        "opening database connection"
    );

    let connect = || -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(&settings.name, open_flags())?;
        configure_connection(&conn, settings.busy_timeout_ms)?;
        Ok(conn)
    };

    connect().map_err(|source| PoolError::Connect {
        database: settings.name.clone(),
        source,
    })
}

/// Creates a new SQLite connection pool with WAL mode and foreign keys enabled.
///
/// Note that every pooled connection to `:memory:` is its own database; tests
/// that share state through the pool should set `pool_max_size` to 1.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the connection pool cannot be created.
pub fn create_pool(settings: &ConnectionSettings) -> Result<DbPool, PoolError> {
    let busy_timeout_ms = settings.busy_timeout_ms;
    let manager = SqliteConnectionManager::file(&settings.name)
        .with_flags(open_flags())
        .with_init(move |conn| configure_connection(conn, busy_timeout_ms));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    Ok(pool)
}
