use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::StorageError;

/// Environment variable prefix for database settings, e.g. `VFS_DATABASE_URL`.
pub const ENV_PREFIX: &str = "VFS_DATABASE_";

/// Connection pool settings for a database backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum idle connections
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Idle connections are closed after this many seconds; 0 keeps them open
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/vfs".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_secs: 10,
            idle_timeout_secs: 600,
        }
    }
}

impl DatabaseConfig {
    /// Defaults, then the TOML file at `path` (if it exists), then `VFS_DATABASE_*`.
    pub fn load(path: Option<&Path>) -> Result<Self, StorageError> {
        let mut figment = Figment::new().merge(Serialized::defaults(DatabaseConfig::default()));

        if let Some(path) = path {
            tracing::debug!("Loading database configuration from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        let config = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        Ok(config)
    }

    /// Configuration for `url` with every other setting defaulted.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}
