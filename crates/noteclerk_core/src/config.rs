//! Process configuration loaded once at startup.
//!
//! # Responsibility
//! - Parse the JSON configuration file into a typed `Config`.
//! - Reject unreadable, unparsable or incomplete configuration with distinct
//!   error kinds.
//! - Derive database connection settings for the relational store.
//!
//! # Invariants
//! - A `Config` returned by `Config::load` has every required field non-empty.
//! - This module never reads process environment variables; callers resolve
//!   the environment name and pass it in.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};

/// Environment variable naming the active configuration profile.
pub const ENVIRONMENT_VAR: &str = "NOTECLERK_ENVIRONMENT";

/// Builds `<config_dir>/config.<environment>.json`.
///
/// The environment name is lowercased, so `Production` and `production`
/// select the same file.
pub fn environment_config_path(config_dir: impl AsRef<Path>, environment: &str) -> PathBuf {
    let environment = environment.trim().to_lowercase();
    config_dir
        .as_ref()
        .join(format!("config.{environment}.json"))
}

/// Errors raised while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// One or more required fields are empty after parsing.
    MissingFields(Vec<&'static str>),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config `{}`: {source}", path.display())
            }
            Self::MissingFields(fields) => {
                write!(f, "config has empty required fields: {}", fields.join(", "))
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::MissingFields(_) => None,
        }
    }
}

/// Server and database configuration.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    pub version: String,
    pub log_path: String,
    pub server_protocol: String,
    pub server_ip: String,
    pub server_port: String,
    pub db_ip: String,
    pub db_port: String,
    pub db_username: String,
    pub db_password: String,
    pub db_name: String,
    pub db_ssl_mode: String,
}

impl Config {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Fails with `MissingFields` when any required field is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingFields(missing))
        }
    }

    /// Lists every required field that is empty or whitespace.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.required_fields()
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    /// Returns the database portion of the configuration.
    pub fn db_settings(&self) -> DbSettings {
        DbSettings {
            user: self.db_username.clone(),
            password: self.db_password.clone(),
            host: self.db_ip.clone(),
            name: self.db_name.clone(),
            ssl_mode: self.db_ssl_mode.clone(),
            port: self.db_port.clone(),
        }
    }

    fn required_fields(&self) -> [(&'static str, &str); 11] {
        [
            ("Version", &self.version),
            ("LogPath", &self.log_path),
            ("ServerProtocol", &self.server_protocol),
            ("ServerIp", &self.server_ip),
            ("ServerPort", &self.server_port),
            ("DbIp", &self.db_ip),
            ("DbPort", &self.db_port),
            ("DbUsername", &self.db_username),
            ("DbPassword", &self.db_password),
            ("DbName", &self.db_name),
            ("DbSslMode", &self.db_ssl_mode),
        ]
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("version", &self.version)
            .field("log_path", &self.log_path)
            .field("server_protocol", &self.server_protocol)
            .field("server_ip", &self.server_ip)
            .field("server_port", &self.server_port)
            .field("db", &self.db_settings())
            .finish()
    }
}

/// Connection parameters for the relational store.
#[derive(Clone, PartialEq, Eq)]
pub struct DbSettings {
    pub user: String,
    pub password: String,
    pub host: String,
    pub name: String,
    pub ssl_mode: String,
    pub port: String,
}

impl DbSettings {
    /// Lists every connection field that is empty or whitespace.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("DbUsername", &self.user),
            ("DbPassword", &self.password),
            ("DbIp", &self.host),
            ("DbName", &self.name),
            ("DbSslMode", &self.ssl_mode),
            ("DbPort", &self.port),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

impl Display for DbSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "user={} password=*** host={} dbname={} sslmode={} port={}",
            self.user, self.host, self.name, self.ssl_mode, self.port
        )
    }
}

impl Debug for DbSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DbSettings({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::{environment_config_path, Config};
    use std::path::Path;

    fn complete_config() -> Config {
        Config {
            version: "1.0.0".to_string(),
            log_path: "/var/log/noteclerk".to_string(),
            server_protocol: "tcp".to_string(),
            server_ip: "127.0.0.1".to_string(),
            server_port: "50051".to_string(),
            db_ip: "localhost".to_string(),
            db_port: "5432".to_string(),
            db_username: "clerk".to_string(),
            db_password: "s3cret".to_string(),
            db_name: "noteclerk".to_string(),
            db_ssl_mode: "disable".to_string(),
        }
    }

    #[test]
    fn complete_config_validates() {
        assert!(complete_config().validate().is_ok());
    }

    #[test]
    fn missing_fields_lists_every_blank_field() {
        let mut config = complete_config();
        config.db_password = "  ".to_string();
        config.version.clear();
        assert_eq!(config.missing_fields(), vec!["Version", "DbPassword"]);
    }

    #[test]
    fn default_config_is_missing_everything() {
        assert_eq!(Config::default().missing_fields().len(), 11);
    }

    #[test]
    fn display_keeps_key_value_layout() {
        let settings = complete_config().db_settings();
        assert_eq!(
            settings.to_string(),
            "user=clerk password=*** host=localhost dbname=noteclerk sslmode=disable port=5432"
        );
    }

    #[test]
    fn display_and_debug_redact_password() {
        let config = complete_config();
        let settings = config.db_settings();
        assert!(!settings.to_string().contains("s3cret"));
        assert!(!format!("{settings:?}").contains("s3cret"));
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn environment_path_is_lowercased() {
        let path = environment_config_path("config", "Production");
        assert_eq!(path, Path::new("config").join("config.production.json"));
    }
}
