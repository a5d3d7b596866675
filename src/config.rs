use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Files searched for configuration, in priority order.
pub const CONFIG_CANDIDATES: [&str; 3] = [
    "config.json",
    "../config/config.json",
    "config/config.json",
];

/// Environment variable overriding the listen port
pub const ENV_PORT: &str = "APP_PORT";

/// Environment variable overriding the server mode
pub const ENV_MODE: &str = "APP_MODE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppInfo,
    pub server: ServerConfig,
    pub log: LogConfig,
}

/// Application metadata reported by the info endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: "App Server".to_string(),
            version: "1.0.0".to_string(),
            description: "Desktop application backend service".to_string(),
            author: "Developer".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `debug` or `release`
    pub mode: String,
    pub allow_origins: Vec<String>,
    /// Seconds allowed for reading a request body
    pub read_timeout: u64,
    /// Seconds allowed for producing a response
    pub write_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1313,
            mode: "debug".to_string(),
            allow_origins: vec!["*".to_string()],
            read_timeout: 30,
            write_timeout: 30,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// trace, debug, info, warn, error
    pub level: String,
    /// text or json
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Where the loaded settings came from.
///
/// Logging is configured from the loaded settings, so the loader reports
/// this back instead of logging it and the caller emits it once the
/// subscriber is installed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// No candidate file exists
    Defaults,
    /// Settings were read from this file
    File(PathBuf),
    /// The file exists but could not be used; defaults were applied instead
    Fallback { path: PathBuf, reason: String },
}

impl Config {
    /// Load configuration from the standard locations and the process
    /// environment.
    pub fn load() -> (Self, ConfigSource) {
        let candidates: Vec<PathBuf> = CONFIG_CANDIDATES.iter().map(PathBuf::from).collect();
        Self::load_from(&candidates, |key| std::env::var(key).ok())
    }

    /// Load configuration from the first existing candidate file, then apply
    /// environment overrides obtained through `env`.
    pub fn load_from<F>(candidates: &[PathBuf], env: F) -> (Self, ConfigSource)
    where
        F: Fn(&str) -> Option<String>,
    {
        let (mut config, source) = match candidates.iter().find(|p| p.is_file()) {
            None => (Self::default(), ConfigSource::Defaults),
            Some(path) => match Self::from_file(path) {
                Ok(config) => (config, ConfigSource::File(path.clone())),
                Err(e) => (
                    Self::default(),
                    ConfigSource::Fallback {
                        path: path.clone(),
                        reason: e.to_string(),
                    },
                ),
            },
        };

        config.apply_env_overrides(env);
        (config, source)
    }

    /// Read a single JSON configuration file. Missing fields keep their
    /// defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `APP_PORT` and `APP_MODE`. An unparsable port is ignored.
    pub fn apply_env_overrides<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = env(ENV_PORT).filter(|v| !v.trim().is_empty()) {
            match port.trim().parse::<u16>() {
                Ok(p) => self.server.port = p,
                Err(e) => {
                    tracing::warn!(value = %port, error = %e, "Ignoring invalid {}", ENV_PORT);
                }
            }
        }

        if let Some(mode) = env(ENV_MODE).filter(|v| !v.trim().is_empty()) {
            self.server.mode = mode.trim().to_string();
        }
    }

    /// Write the configuration as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(path, data).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn is_release(&self) -> bool {
        self.server.mode == "release"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.app.name, "App Server");
        assert_eq!(config.server.port, 1313);
        assert_eq!(config.server.address(), "127.0.0.1:1313");
        assert_eq!(config.server.allow_origins, vec!["*".to_string()]);
        assert_eq!(config.log.level, "info");
        assert!(!config.is_release());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server": {"port": 8080, "allowOrigins": ["http://a"]}}"#)
            .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.allow_origins, vec!["http://a".to_string()]);
        assert_eq!(config.app, AppInfo::default());
    }

    #[test]
    fn test_load_uses_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("missing.json");
        let second = dir.path().join("second.json");
        let third = dir.path().join("third.json");
        std::fs::write(&second, r#"{"server": {"port": 2000}}"#).unwrap();
        std::fs::write(&third, r#"{"server": {"port": 3000}}"#).unwrap();

        let (config, source) = Config::load_from(&[first, second.clone(), third], no_env);
        assert_eq!(config.server.port, 2000);
        assert_eq!(source, ConfigSource::File(second));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = Config::load_from(&[dir.path().join("nope.json")], no_env);
        assert_eq!(config, Config::default());
        assert_eq!(source, ConfigSource::Defaults);
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let (config, source) =
            Config::load_from(&[path.clone()], env_from(&[("APP_MODE", "release")]));
        assert_eq!(config.server.port, 1313);
        assert!(config.is_release());
        assert!(matches!(source, ConfigSource::Fallback { path: p, .. } if p == path));
    }

    #[test]
    fn test_env_port_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server": {"port": 2000}}"#).unwrap();

        let (config, _) = Config::load_from(&[path], env_from(&[("APP_PORT", "4000")]));
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn test_invalid_or_empty_env_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(env_from(&[("APP_PORT", "eighty"), ("APP_MODE", "")]));
        assert_eq!(config.server.port, 1313);
        assert_eq!(config.server.mode, "debug");

        config.apply_env_overrides(env_from(&[("APP_PORT", "70000")]));
        assert_eq!(config.server.port, 1313);

        // Trailing garbage is rejected, not truncated to the leading digits
        config.apply_env_overrides(env_from(&[("APP_PORT", "8080x")]));
        assert_eq!(config.server.port, 1313);
    }

    #[test]
    fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.app.name = "Saved".to_string();
        config.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"allowOrigins\""));
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }
}
