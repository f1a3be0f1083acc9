//! Tool configuration: data directory and named server definitions.
//!
//! Stored as TOML under the platform config directory
//! (`<config_dir>/ferry/config.toml`):
//!
//! ```toml
//! data_directory = "/var/lib/ferry"
//! default_source = "staging"
//!
//! [servers.staging]
//! type = "http"
//! host = "https://staging.example.com/api"
//! username = "ferry"
//! password = "secret"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ferry_core::ServerDefinition;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory available on this platform")]
    NoConfigDir,
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("unknown server `{0}`; define it with `ferryctl define-server`")]
    UnknownServer(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_directory: Option<PathBuf>,
    pub default_source: Option<String>,
    pub default_target: Option<String>,
    pub servers: BTreeMap<String, ServerDefinition>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("ferry").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw).map_err(write_err)
    }

    /// The configured data directory, or the platform-local default.
    pub fn data_directory(&self) -> PathBuf {
        self.data_directory.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map_or_else(|| PathBuf::from("ferry-data"), |dir| dir.join("ferry"))
        })
    }

    pub fn server(&self, name: &str) -> Result<&ServerDefinition, ConfigError> {
        self.servers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownServer(name.to_string()))
    }

    /// Resolve a server by explicit name, falling back to the configured
    /// default for the given role. `Ok(None)` when neither is set.
    pub fn resolve_server(
        &self,
        explicit: Option<&str>,
        default: Option<&str>,
    ) -> Result<Option<&ServerDefinition>, ConfigError> {
        match explicit.or(default) {
            Some(name) => self.server(name).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::ServerKind;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(config.servers.is_empty());
        assert!(config.data_directory.is_none());
    }

    #[test]
    fn round_trips_server_definitions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config {
            data_directory: Some(PathBuf::from("/tmp/ferry")),
            default_source: Some("staging".to_string()),
            ..Config::default()
        };
        config.servers.insert(
            "staging".to_string(),
            ServerDefinition {
                kind: ServerKind::Http,
                host: "https://staging.example.com".to_string(),
                username: Some("ferry".to_string()),
                password: Some("secret".to_string()),
                port: None,
            },
        );
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.default_source.as_deref(), Some("staging"));
        let server = loaded.server("staging").unwrap();
        assert_eq!(server.host, "https://staging.example.com");
        assert_eq!(server.kind, ServerKind::Http);

        let resolved = loaded
            .resolve_server(None, loaded.default_source.as_deref())
            .unwrap();
        assert!(resolved.is_some());
    }

    #[test]
    fn unknown_server_is_an_error() {
        let config = Config::default();
        assert!(matches!(
            config.server("nope"),
            Err(ConfigError::UnknownServer(_))
        ));
    }
}
