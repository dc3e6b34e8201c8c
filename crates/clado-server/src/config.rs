//! Server configuration from environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3030;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listen address.
    pub addr: SocketAddr,
    /// Directory for board snapshots. `None` uses the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// JSON file mapping access tokens to identities.
    pub identities: Option<PathBuf>,
    /// How long a changed board may stay unsaved.
    pub autosave_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            data_dir: None,
            identities: None,
            autosave_interval: Duration::from_secs(
                clado_core::storage::DEFAULT_AUTOSAVE_INTERVAL_SECS,
            ),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CLADO_ADDR`: listen address (default: 0.0.0.0:3030)
    /// - `CLADO_DATA_DIR`: snapshot directory (default: platform data dir)
    /// - `CLADO_IDENTITIES`: identities JSON file (default: none, every session is denied)
    /// - `CLADO_AUTOSAVE_SECS`: autosave interval in seconds (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("CLADO_ADDR") {
            config.addr = addr.parse().map_err(|_| ConfigError::Invalid {
                name: "CLADO_ADDR",
                value: addr.clone(),
            })?;
        }

        config.data_dir = lookup("CLADO_DATA_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        config.identities = lookup("CLADO_IDENTITIES")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        if let Some(secs) = lookup("CLADO_AUTOSAVE_SECS") {
            let secs: u64 = secs.parse().map_err(|_| ConfigError::Invalid {
                name: "CLADO_AUTOSAVE_SECS",
                value: secs.clone(),
            })?;
            config.autosave_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.addr.port(), 3030);
        assert_eq!(config.autosave_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("CLADO_ADDR", "127.0.0.1:4000"),
            ("CLADO_DATA_DIR", "/tmp/boards"),
            ("CLADO_IDENTITIES", "ids.json"),
            ("CLADO_AUTOSAVE_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/boards")));
        assert_eq!(config.identities, Some(PathBuf::from("ids.json")));
        assert_eq!(config.autosave_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values() {
        let err = ServerConfig::from_lookup(lookup(&[("CLADO_AUTOSAVE_SECS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "CLADO_AUTOSAVE_SECS",
                value: "soon".to_string()
            }
        );
        assert!(ServerConfig::from_lookup(lookup(&[("CLADO_ADDR", "nowhere")])).is_err());
    }
}
