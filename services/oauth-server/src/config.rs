//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The admin token is loaded from ADMIN_TOKEN or admin.token_file, never
//! stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Public protocol listener
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Operator-only listener for client registration
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    pub listen_addr: SocketAddr,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// Path to a file containing the admin token (alternative to ADMIN_TOKEN env var)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

/// Credential store backend selection
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub driver: StoreDriver,
    /// Store file location, required by the file driver
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_code_ttl_secs")]
    pub code_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: StoreDriver::default(),
            path: None,
            code_ttl_secs: default_code_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreDriver {
    #[default]
    Memory,
    File,
}

impl FromStr for StoreDriver {
    type Err = common::Error;

    fn from_str(s: &str) -> common::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreDriver::Memory),
            "file" => Ok(StoreDriver::File),
            other => Err(common::Error::Config(format!(
                "unknown store driver {other:?}, expected \"memory\" or \"file\""
            ))),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_code_ttl_secs() -> u64 {
    oauth_store::DEFAULT_CODE_TTL.as_secs()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// STORE_DRIVER overrides `store.driver`. Admin token resolution order:
    /// 1. ADMIN_TOKEN env var
    /// 2. token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(driver) = std::env::var("STORE_DRIVER") {
            config.store.driver = driver.parse()?;
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.store.code_ttl_secs == 0 {
            return Err(common::Error::Config(
                "code_ttl_secs must be greater than 0".into(),
            ));
        }

        if config.store.driver == StoreDriver::File && config.store.path.is_none() {
            return Err(common::Error::Config(
                "store.path is required when store.driver = \"file\"".into(),
            ));
        }

        // The admin surface hands out client secrets; it must never share
        // a socket with the public endpoints.
        if config.admin.listen_addr == config.server.listen_addr {
            return Err(common::Error::Config(format!(
                "admin.listen_addr must differ from server.listen_addr ({})",
                config.server.listen_addr
            )));
        }

        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            config.admin.token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.admin.token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.admin.token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-server.toml")
    }

    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.store.code_ttl_secs)
    }
}
