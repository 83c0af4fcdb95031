use serde::{Deserialize, Serialize};
use std::path::Path;

use super::errors::ConfigError;
use super::logging::LoggingConfig;
use super::server::ServerEntry;
use super::tls::TlsConfig;
use crate::DotServer;

const LOCAL_CONFIG_PATH: &str = "ferrous-dot.toml";
const SYSTEM_CONFIG_PATH: &str = "/etc/ferrous-dot/config.toml";

/// Main configuration structure for Ferrous DoT
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Trust anchors and session cache sizing
    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

impl Config {
    /// Load configuration from file or use defaults
    ///
    /// Priority order:
    /// 1. Explicitly provided path
    /// 2. ferrous-dot.toml in current directory
    /// 3. /etc/ferrous-dot/config.toml
    /// 4. Default configuration
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        match path.map(str::to_string).or_else(Self::get_config_path) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tls.session_cache_servers == 0 || self.tls.session_cache_tickets == 0 {
            return Err(ConfigError::Validation(
                "Session cache sizes must be non-zero".to_string(),
            ));
        }

        for server in &self.servers {
            server.validate()?;
        }

        Ok(())
    }

    /// Runtime identities for every configured server, in file order.
    pub fn servers(&self) -> Result<Vec<DotServer>, ConfigError> {
        let anchors = self.tls.trust_anchors();
        self.servers
            .iter()
            .map(|entry| entry.to_server(anchors.clone()))
            .collect()
    }

    /// Get the path to the configuration file being used
    pub fn get_config_path() -> Option<String> {
        [LOCAL_CONFIG_PATH, SYSTEM_CONFIG_PATH]
            .into_iter()
            .find(|path| Path::new(path).exists())
            .map(str::to_string)
    }
}
