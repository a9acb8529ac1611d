use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::archive::ScanMode;
use crate::cache::BlobCache;
use crate::cli::Cli;
use crate::error::LoaderError;

pub const CONFIG_ENV: &str = "CLASS_CACHE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub mode: ScanMode,
    /// Retention queue bound; `-1` keeps every touched key pinned.
    pub hard_size: i64,
    /// Soft pool size for reclaimable entries; `None` keeps everything strong.
    pub soft_capacity: Option<usize>,
    pub database: Option<DatabaseConfig>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::Lazy,
            hard_size: -1,
            soft_capacity: None,
            database: None,
        }
    }
}

impl LoaderConfig {
    pub fn build_cache(&self) -> std::result::Result<BlobCache, LoaderError> {
        match self.soft_capacity {
            None => Ok(BlobCache::strong_only()),
            Some(capacity) => {
                let capacity = NonZeroUsize::new(capacity)
                    .ok_or_else(|| LoaderError::invalid("soft capacity must be positive"))?;
                Ok(BlobCache::with_soft_backing(self.hard_size, capacity))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub connection: DbConnectionSpec,
    #[serde(default)]
    pub pool: PoolSettings,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DbConnectionSpec {
    pub driver: String,
    pub url: String,
    pub table: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for DbConnectionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnectionSpec")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("table", &self.table)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub max_idle_time_secs: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_pool_size: 0,
            max_pool_size: 8,
            max_idle_time_secs: 300,
            acquire_timeout_ms: 30_000,
        }
    }
}

/// Explicit `--config`, then `CLASS_CACHE_CONFIG`, then the per-user default
/// file if it exists.
pub fn resolve_config_path(cli: &Cli) -> Result<Option<PathBuf>> {
    if let Some(p) = cli.config.clone() {
        return Ok(Some(p));
    }

    if let Ok(p) = env::var(CONFIG_ENV) {
        return Ok(Some(PathBuf::from(p)));
    }

    let default_path = class_cache_home()?.join("config.json");
    Ok(default_path.exists().then_some(default_path))
}

pub fn load_config(path: &Path) -> Result<LoaderConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn load_database_config(path: &Path) -> Result<DatabaseConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read database config: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse database config: {}", path.display()))
}

/// File config overlaid with command line flags.
pub fn resolve_loader_config(cli: &Cli) -> Result<LoaderConfig> {
    let mut config = match resolve_config_path(cli)? {
        Some(path) => load_config(&path)?,
        None => LoaderConfig::default(),
    };

    if cli.eager {
        config.mode = ScanMode::Eager;
    }
    if let Some(hard_size) = cli.hard_size {
        config.hard_size = hard_size;
    }
    if let Some(capacity) = cli.soft_capacity {
        config.soft_capacity = Some(capacity);
    }
    if let Some(path) = cli.db_config.as_deref() {
        config.database = Some(load_database_config(path)?);
    }
    Ok(config)
}

fn class_cache_home() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve config directory"))?;
    Ok(base.join("class-cache"))
}
