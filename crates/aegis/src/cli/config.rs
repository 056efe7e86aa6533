//! Config file and database resolution shared by all subcommands.

use std::path::{Path, PathBuf};

use aegis_db::AegisDb;
use aegis_protocol::defaults::{DEFAULT_CONFIG_FILE, DEFAULT_DATABASE_FILE};
use aegis_protocol::SystemConfig;
use anyhow::{Context, Result};
use tracing::debug;

/// Options every subcommand accepts.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

/// `--config` if given, else `<aegis_home>/aegis.toml`.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(aegis_logging::aegis_home()?.join(DEFAULT_CONFIG_FILE)),
    }
}

/// Load the config file; a missing default file yields the defaults, a
/// missing explicit file is an error.
pub fn load_config(options: &GlobalOptions) -> Result<SystemConfig> {
    let path = config_path(options.config.as_deref())?;
    if options.config.is_some() && !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }

    let mut config = SystemConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(database) = &options.database {
        config.store.database_path = Some(database.clone());
    }
    debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

pub fn database_path(config: &SystemConfig) -> Result<PathBuf> {
    match &config.store.database_path {
        Some(path) => Ok(path.clone()),
        None => Ok(aegis_logging::aegis_home()?.join(DEFAULT_DATABASE_FILE)),
    }
}

pub async fn open_db(config: &SystemConfig) -> Result<AegisDb> {
    let path = database_path(config)?;
    AegisDb::open_with(&path, config.store.max_connections)
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))
}
