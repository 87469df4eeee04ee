//! Configuration loading from file and environment variables.

use roster_db::ConnectionSettings;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level configuration shared by the server and the migration binary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    #[serde(default = "default_db_host")]
    pub host: String,

    /// Database port.
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database name; the SQLite file path.
    #[serde(default = "default_db_name")]
    pub name: String,

    /// Database user.
    #[serde(default = "default_db_user")]
    pub user: String,

    /// Database password.
    #[serde(default)]
    pub password: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// Apply pending schema migrations when the server starts.
    #[serde(default = "default_true")]
    pub migrate_on_startup: bool,

    /// Run the data migration pass after schema migrations in `roster-migrate`.
    #[serde(default = "default_true")]
    pub run_data_migrations: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "roster_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Optional file that receives a copy of every log line. Missing parent
    /// directories are created.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    5000
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "roster.db".to_string()
}

fn default_db_user() -> String {
    "roster".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: String::new(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            migrate_on_startup: true,
            run_data_migrations: true,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field("pool_max_size", &self.pool_max_size)
            .field("migrate_on_startup", &self.migrate_on_startup)
            .field("run_data_migrations", &self.run_data_migrations)
            .finish()
    }
}

impl DatabaseConfig {
    /// Connection parameters for `roster-db`.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            host: self.host.clone(),
            port: self.port,
            name: self.name.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Picks the config file path: first CLI argument, then `ROSTER_CONFIG_PATH`.
///
/// Returns the path (if any) and where it came from, for logging.
pub fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("ROSTER_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn parse_bool(value: &str) -> bool {
    value == "true" || value == "1"
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `ROSTER_HOST` / `ROSTER_PORT` override `server.host` / `server.port`
/// - `ROSTER_DB_HOST`, `ROSTER_DB_PORT`, `ROSTER_DB_NAME`, `ROSTER_DB_USER`,
///   `ROSTER_DB_PASSWORD` override the matching `database` fields
/// - `ROSTER_MIGRATE_ON_STARTUP` and `ROSTER_RUN_DATA_MIGRATIONS` override
///   the migration switches ("true" or "1" enables)
/// - `ROSTER_LOG_LEVEL` overrides `logging.level`
/// - `ROSTER_LOG_JSON` overrides `logging.json`
/// - `ROSTER_LOG_FILE` overrides `logging.file` (empty disables file output)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(parsed) = var("ROSTER_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("ROSTER_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(host) = var("ROSTER_DB_HOST") {
        config.database.host = host;
    }
    if let Some(parsed) = var("ROSTER_DB_PORT").and_then(|v| v.parse().ok()) {
        config.database.port = parsed;
    }
    if let Some(name) = var("ROSTER_DB_NAME") {
        config.database.name = name;
    }
    if let Some(user) = var("ROSTER_DB_USER") {
        config.database.user = user;
    }
    if let Some(password) = var("ROSTER_DB_PASSWORD") {
        config.database.password = password;
    }
    if let Some(flag) = var("ROSTER_MIGRATE_ON_STARTUP") {
        config.database.migrate_on_startup = parse_bool(&flag);
    }
    if let Some(flag) = var("ROSTER_RUN_DATA_MIGRATIONS") {
        config.database.run_data_migrations = parse_bool(&flag);
    }
    if let Some(level) = var("ROSTER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("ROSTER_LOG_JSON") {
        config.logging.json = parse_bool(&json);
    }
    if let Some(file) = var("ROSTER_LOG_FILE") {
        let file = file.trim();
        config.logging.file = (!file.is_empty()).then(|| file.to_string());
    }
}
