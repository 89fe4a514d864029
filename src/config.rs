//! Layered configuration: built-in defaults, overridden by an optional YAML
//! file, overridden by CLI flags. Matches the key names the original
//! server's YAML config used (`network.port`, `database.*`).

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

fn default_port() -> u16 {
    42371
}

fn default_driver() -> String {
    "sqlite".to_string()
}

fn default_db_file() -> String {
    "dvdyellow.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig { port: default_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default = "default_db_file")]
    pub file: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            driver: default_driver(),
            username: None,
            password: None,
            host: None,
            port: None,
            name: None,
            options: None,
            file: default_db_file(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Load a config from a YAML file. Unknown top-level or nested keys are
    /// ignored (forward compatibility); a missing/unreadable file or
    /// malformed YAML is a startup error.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config file {}: {e}", path.display())))?;
        serde_yaml::from_str(&text).map_err(|e| Error::Config(format!("malformed config YAML: {e}")))
    }
}
