//! `PostgreSQL` store and load configuration.
//!
//! Both structures are resolved once at startup from environment variables
//! and passed into the store and the loader. Nothing reads the environment
//! after that.
//!
//! | Variable                    | Default           |
//! |-----------------------------|-------------------|
//! | `DB_HOST`                   | `localhost`       |
//! | `DB_PORT`                   | `5432`            |
//! | `DB_NAME`                   | `postgres`        |
//! | `DB_USER`                   | `postgres`        |
//! | `DB_PASSWORD`               | (empty)           |
//! | `DB_POOL_SIZE`              | `4`               |
//! | `DB_CONNECT_TIMEOUT_MS`     | `10000`           |
//! | `COPYFLOW_TABLE`            | `bulk_test_table` |
//! | `COPYFLOW_DATA_FILE`        | `data.tsv`        |
//! | `COPYFLOW_SCHEMA_FILE`      | `sql/schema.sql`  |
//! | `COPYFLOW_RECORD_COUNT`     | `100000`          |
//! | `COPYFLOW_CHANNEL_CAPACITY` | `4`               |
//! | `COPYFLOW_CHUNK_BYTES`      | `65536`           |
//! | `COPYFLOW_READ_CHUNK_BYTES` | `1048576`         |
//! | `COPYFLOW_RESTORE_ATTEMPTS` | `3`               |
//! | `COPYFLOW_RESTORE_BACKOFF_MS` | `200`           |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use copyflow_core::channel::{ChannelConfig, DEFAULT_CHUNK_BYTES, DEFAULT_READ_CHUNK_BYTES};
use copyflow_core::dataset::{DEFAULT_DATASET_FILE, DEFAULT_RECORD_COUNT};

use crate::error::ConfigError;

/// Default target table.
pub const DEFAULT_TABLE: &str = "bulk_test_table";

/// Default schema file applied by `apply-schema`.
pub const DEFAULT_SCHEMA_FILE: &str = "sql/schema.sql";

/// Connection settings for the store.
#[derive(Clone)]
pub struct StoreConfig {
    /// `PostgreSQL` hostname.
    pub host: String,

    /// `PostgreSQL` port.
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username for authentication.
    pub user: String,

    /// Password for authentication.
    pub password: String,

    /// Connection pool size.
    pub pool_size: usize,

    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            pool_size: 4,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("pool_size", &self.pool_size)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl StoreConfig {
    /// Resolves the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the configuration through `lookup`, falling back to defaults
    /// for unset keys.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("DB_HOST") {
            cfg.host = v;
        }
        if let Some(v) = parse_var(&lookup, "DB_PORT")? {
            cfg.port = v;
        }
        if let Some(v) = lookup("DB_NAME") {
            cfg.database = v;
        }
        if let Some(v) = lookup("DB_USER") {
            cfg.user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            cfg.password = v;
        }
        if let Some(v) = parse_var(&lookup, "DB_POOL_SIZE")? {
            cfg.pool_size = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "DB_CONNECT_TIMEOUT_MS")? {
            cfg.connect_timeout = Duration::from_millis(ms);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Inconsistent` on invalid combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Inconsistent("DB_HOST must not be empty".into()));
        }
        if self.database.is_empty() {
            return Err(ConfigError::Inconsistent("DB_NAME must not be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Inconsistent("DB_POOL_SIZE must be > 0".into()));
        }
        Ok(())
    }

    /// Builds the `tokio-postgres` connection configuration.
    #[must_use]
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .connect_timeout(self.connect_timeout)
            .application_name("copyflow");
        if !self.password.is_empty() {
            pg.password(&self.password);
        }
        pg
    }
}

/// Settings for one load session.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Target table.
    pub table: TableName,

    /// Dataset file read by file-backed loads.
    pub data_file: PathBuf,

    /// Schema file applied by `apply-schema`.
    pub schema_file: PathBuf,

    /// Records the load is expected to contain, known before it starts.
    pub expected_records: u64,

    /// Producer-to-sink channel settings.
    pub channel: ChannelConfig,

    /// Attempts made to restore durable mode.
    pub restore_attempts: u32,

    /// Delay before each restore retry, multiplied by the attempt number.
    pub restore_backoff: Duration,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            table: TableName::default(),
            data_file: PathBuf::from(DEFAULT_DATASET_FILE),
            schema_file: PathBuf::from(DEFAULT_SCHEMA_FILE),
            expected_records: DEFAULT_RECORD_COUNT,
            channel: ChannelConfig::default(),
            restore_attempts: 3,
            restore_backoff: Duration::from_millis(200),
        }
    }
}

impl LoadConfig {
    /// Creates a config for `table` with default settings.
    #[must_use]
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            ..Default::default()
        }
    }

    /// Resolves the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = parse_var(&lookup, "COPYFLOW_TABLE")? {
            cfg.table = v;
        }
        if let Some(v) = lookup("COPYFLOW_DATA_FILE") {
            cfg.data_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("COPYFLOW_SCHEMA_FILE") {
            cfg.schema_file = PathBuf::from(v);
        }
        if let Some(v) = parse_var(&lookup, "COPYFLOW_RECORD_COUNT")? {
            cfg.expected_records = v;
        }

        let capacity = parse_var(&lookup, "COPYFLOW_CHANNEL_CAPACITY")?
            .unwrap_or(cfg.channel.capacity);
        let chunk_bytes =
            parse_var(&lookup, "COPYFLOW_CHUNK_BYTES")?.unwrap_or(DEFAULT_CHUNK_BYTES);
        let read_chunk_bytes =
            parse_var(&lookup, "COPYFLOW_READ_CHUNK_BYTES")?.unwrap_or(DEFAULT_READ_CHUNK_BYTES);
        cfg.channel = ChannelConfig {
            capacity,
            chunk_bytes,
            read_chunk_bytes,
        };

        if let Some(v) = parse_var(&lookup, "COPYFLOW_RESTORE_ATTEMPTS")? {
            cfg.restore_attempts = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "COPYFLOW_RESTORE_BACKOFF_MS")? {
            cfg.restore_backoff = Duration::from_millis(ms);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Inconsistent` on invalid combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channel
            .validate()
            .map_err(|e| ConfigError::Inconsistent(e.to_string()))?;
        if self.restore_attempts == 0 {
            return Err(ConfigError::Inconsistent(
                "COPYFLOW_RESTORE_ATTEMPTS must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// A validated, optionally schema-qualified table name.
///
/// Each part must start with a letter or underscore and contain only ASCII
/// letters, digits and underscores, so the name can be spliced into
/// administrative statements without quoting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: Option<String>,
    table: String,
}

impl TableName {
    /// Creates a table name without validation.
    fn unchecked(schema: Option<&str>, table: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        }
    }

    /// Schema part, if qualified.
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Unqualified table part.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Default for TableName {
    fn default() -> Self {
        Self::unchecked(None, DEFAULT_TABLE)
    }
}

impl FromStr for TableName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        let (schema, table) = match parts.as_slice() {
            [table] => (None, *table),
            [schema, table] => (Some(*schema), *table),
            _ => return Err(format!("expected [schema.]table, got '{s}'")),
        };
        for part in schema.iter().chain(std::iter::once(&table)) {
            if !is_identifier(part) {
                return Err(format!("'{part}' is not a plain SQL identifier"));
            }
        }
        Ok(Self::unchecked(schema, table))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, &v, e)),
        None => Ok(None),
    }
}
