//! Settings file handling.
//!
//! Settings live in a TOML file; every key is optional and falls back to the
//! Debian/Ubuntu layout nginx and ufw install into.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const APP_DIR: &str = "proxy-console";
const CONFIG_FILE: &str = "config.toml";
const LOG_FILE: &str = "proxy-console.log";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where proxy configs are written, one `<name>.conf` per config
    pub configs_dir: PathBuf,
    /// Certificate and key storage
    pub cert_dir: PathBuf,
    pub nginx_dir: PathBuf,
    pub ufw_dir: PathBuf,
    /// Distribution default sites removed when a config is added
    pub default_site_files: Vec<PathBuf>,
    /// Opened by every firewall install and every added config
    pub base_firewall_ports: Vec<String>,
    /// Shell used to interpret command lines
    pub shell: String,
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            configs_dir: PathBuf::from("/etc/nginx/conf.d"),
            cert_dir: PathBuf::from("/etc/ssl/files"),
            nginx_dir: PathBuf::from("/etc/nginx"),
            ufw_dir: PathBuf::from("/etc/ufw"),
            default_site_files: vec![
                PathBuf::from("/etc/nginx/sites-enabled/default"),
                PathBuf::from("/etc/nginx/conf.d/default.conf"),
            ],
            base_firewall_ports: vec!["9011/tcp".to_string(), "22/tcp".to_string()],
            shell: "bash".to_string(),
            log_file: None,
        }
    }
}

impl Settings {
    /// Load settings from `explicit`, else the per-user config file when it
    /// exists, else defaults. An explicit path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Self::load_from(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// `~/.config/proxy-console/config.toml` on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// The configured log file, or one under the user cache directory.
    pub fn log_path(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
                .join(LOG_FILE)
        })
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.configs_dir.join(format!("{name}.conf"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "").unwrap();

        assert_eq!(Settings::load_from(&path).unwrap(), Settings::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "configs_dir = \"/srv/nginx\"\nbase_firewall_ports = [\"2222/tcp\"]\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.configs_dir, PathBuf::from("/srv/nginx"));
        assert_eq!(settings.base_firewall_ports, ["2222/tcp"]);
        assert_eq!(settings.cert_dir, PathBuf::from("/etc/ssl/files"));
        assert_eq!(settings.shell, "bash");
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");

        assert!(matches!(
            Settings::load(Some(&path)),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "configs_dir = [").unwrap();

        assert!(matches!(
            Settings::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn config_path_appends_extension() {
        let settings = Settings::default();
        assert_eq!(
            settings.config_path("edge1"),
            PathBuf::from("/etc/nginx/conf.d/edge1.conf")
        );
    }
}
