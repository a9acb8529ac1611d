//! Database backed resolution.
//!
//! Resources live in a table with the shape
//!
//! ```sql
//! CREATE TABLE class_store (
//!     package_name TEXT NOT NULL,
//!     class_name   TEXT NOT NULL,
//!     class_code   BLOB,
//!     PRIMARY KEY (package_name, class_name)
//! );
//! ```
//!
//! A key such as `com/acme/Foo.class` is looked up as
//! `(package_name = 'com.acme', class_name = 'Foo')`. Values are bound as
//! statement parameters; the escaped literal form of the query is only
//! rendered for logging.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::Blob;
use crate::config::{DatabaseConfig, DbConnectionSpec, PoolSettings};
use crate::error::{LoaderError, Result};
use crate::key::ResourceKey;
use crate::resolver::Resolver;

pub const PACKAGE_COLUMN: &str = "package_name";
pub const CLASS_COLUMN: &str = "class_name";
pub const CODE_COLUMN: &str = "class_code";

pub const SQLITE_DRIVER: &str = "sqlite";

/// Doubles every `'` and then every `\`.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''").replace('\\', "\\\\")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupQuery {
    table: String,
    package: String,
    class: String,
}

impl LookupQuery {
    pub fn new(table: &str, key: &ResourceKey) -> Result<Self> {
        validate_table_name(table)?;
        let (package, class) = key.package_and_name();
        Ok(Self {
            table: table.to_string(),
            package,
            class,
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Parameterized statement; `?1` is the class name, `?2` the package.
    pub fn sql(&self) -> String {
        format!(
            "SELECT {CODE_COLUMN} FROM {} WHERE {CLASS_COLUMN} = ?1 AND {PACKAGE_COLUMN} = ?2",
            self.table
        )
    }

    /// The same lookup with escaped literals inlined.
    pub fn literal_sql(&self) -> String {
        format!(
            "SELECT {CODE_COLUMN} FROM {} WHERE {CLASS_COLUMN} = '{}' AND {PACKAGE_COLUMN} = '{}'",
            self.table,
            escape_literal(&self.class),
            escape_literal(&self.package)
        )
    }
}

fn validate_table_name(table: &str) -> Result<()> {
    if table.is_empty() {
        return Err(LoaderError::invalid("table name is empty"));
    }
    let valid = table
        .split('.')
        .all(|part| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        return Err(LoaderError::invalid(format!("invalid table name: {table:?}")));
    }
    Ok(())
}

pub struct DatabaseResolver {
    pool: Pool<SqliteConnectionManager>,
    table: String,
}

impl std::fmt::Debug for DatabaseResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseResolver")
            .field("table", &self.table)
            .field("pool", &self.pool.state())
            .finish()
    }
}

impl DatabaseResolver {
    /// Builds the resolver and its connection pool. Connections are opened on
    /// demand, so an unreachable database surfaces at lookup time.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let DatabaseConfig { connection, pool } = config;
        validate_table_name(&connection.table)?;
        let manager = connection_manager(connection)?;
        if !connection.username.is_empty() || !connection.password.is_empty() {
            tracing::debug!(driver = %connection.driver, "credentials are not used by this driver");
        }

        let pool = build_pool(manager, pool)?;
        Ok(Self {
            pool,
            table: connection.table.clone(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Looks up a single row. Errors are returned to the caller; the
    /// [`Resolver`] implementation logs them and reports absent instead.
    pub fn lookup(&self, key: &ResourceKey) -> Result<Option<Blob>> {
        let query = LookupQuery::new(&self.table, key)?;
        tracing::debug!(sql = %query.literal_sql(), "database lookup");

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&query.sql())?;
        let code: Option<Option<Vec<u8>>> = stmt
            .query_row([query.class(), query.package()], |row| {
                row.get::<_, Option<Vec<u8>>>(0)
            })
            .optional()?;
        Ok(code.flatten().map(Blob::from))
    }

    pub fn idle_connections(&self) -> u32 {
        self.pool.state().idle_connections
    }

    pub fn connections(&self) -> u32 {
        self.pool.state().connections
    }
}

impl Resolver for DatabaseResolver {
    fn name(&self) -> &str {
        "database"
    }

    fn resolve(&self, key: &ResourceKey) -> Option<Blob> {
        match self.lookup(key) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(key = %key, table = %self.table, error = %err, "database lookup failed");
                None
            }
        }
    }
}

fn connection_manager(spec: &DbConnectionSpec) -> Result<SqliteConnectionManager> {
    if !spec.driver.eq_ignore_ascii_case(SQLITE_DRIVER) {
        return Err(LoaderError::invalid(format!(
            "unsupported database driver: {:?}",
            spec.driver
        )));
    }
    let url = spec.url.trim();
    if url.is_empty() {
        return Err(LoaderError::invalid("database url is empty"));
    }
    let location = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    if location.is_empty() || location == ":memory:" {
        return Err(LoaderError::invalid(
            "database url must name a file shared by pooled connections",
        ));
    }
    Ok(SqliteConnectionManager::file(PathBuf::from(location)))
}

fn build_pool(
    manager: SqliteConnectionManager,
    settings: &PoolSettings,
) -> Result<Pool<SqliteConnectionManager>> {
    if settings.max_pool_size == 0 {
        return Err(LoaderError::invalid("max pool size must be positive"));
    }
    if settings.min_pool_size > settings.max_pool_size {
        return Err(LoaderError::invalid(
            "min pool size must not exceed max pool size",
        ));
    }

    let idle_timeout = (settings.max_idle_time_secs > 0)
        .then(|| Duration::from_secs(settings.max_idle_time_secs));
    Ok(Pool::builder()
        .max_size(settings.max_pool_size)
        .min_idle(Some(settings.min_pool_size))
        .idle_timeout(idle_timeout)
        .connection_timeout(Duration::from_millis(settings.acquire_timeout_ms.max(1)))
        .build_unchecked(manager))
}
