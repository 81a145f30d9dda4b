//! Server configuration: TOML file first, command-line flags on top.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use calc_net::{Mode, ServerConfig};

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "CALCD_CONFIG";

/// Flags that override whatever the config file says.
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub host: Option<Ipv4Addr>,
    pub port: Option<u16>,
    pub mode: Option<Mode>,
}

impl Overrides {
    pub fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        config
    }
}

/// Read the config file at `path`, or at `$CALCD_CONFIG`, or fall back to
/// defaults when neither is given.
pub fn load(path: Option<&Path>) -> Result<ServerConfig> {
    let path = path
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let Some(path) = path else {
        return Ok(ServerConfig::default());
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("invalid config {}", path.display()))?;
    tracing::debug!("loaded config from {}", path.display());
    Ok(config)
}
