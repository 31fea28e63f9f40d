//! Server configuration.
//!
//! Loaded from the file named by `QVARN_CONFIG` (any format the `config`
//! crate understands) with `QVARN_`-prefixed environment variables layered
//! on top, then validated once at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use qvarn_db_postgres::DatabaseConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL used in `Location` headers.
    #[serde(default = "default_baseurl")]
    pub baseurl: String,

    /// Use the in-memory store instead of PostgreSQL.
    #[serde(default = "default_true")]
    pub memory_database: bool,

    #[serde(default)]
    pub enable_fine_grained_access_control: bool,

    #[serde(default)]
    pub enable_access_log: bool,

    /// Directory of `*.yaml` resource type specifications.
    #[serde(default)]
    pub resource_type_dir: Option<PathBuf>,

    /// PostgreSQL connection parameters; required unless
    /// `memory_database` is set.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Bearer token verification; absent means development mode, where
    /// tokens are decoded without verification.
    #[serde(default)]
    pub token: Option<TokenConfig>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            baseurl: default_baseurl(),
            memory_database: true,
            enable_fine_grained_access_control: false,
            enable_access_log: false,
            resource_type_dir: None,
            database: None,
            token: None,
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// RSA public key, expected issuer and audience of bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub public_key: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_baseurl() -> String {
    "http://localhost:12765".to_string()
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    12765
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Loads the configuration from `QVARN_CONFIG` and the environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("QVARN_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("QVARN")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.baseurl.is_empty() {
            return Err("baseurl must not be empty".into());
        }
        if !self.memory_database && self.database.is_none() {
            return Err("database settings are required unless memory_database is set".into());
        }
        let level = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&level.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Initialises tracing from `RUST_LOG`, falling back to the given level.
pub fn init_tracing(fallback_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.memory_database);
        assert_eq!(config.server.port, 12765);
    }

    #[test]
    fn test_postgres_needs_database_settings() {
        let config = AppConfig {
            memory_database: false,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_log_level_is_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "noisy".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserializes_from_toml_fragment() {
        let config: AppConfig = toml_from_str(
            r#"
            baseurl = "https://qvarn.example.com"
            memory_database = false

            [database]
            database = "qvarn"
            user = "qvarn"

            [server]
            port = 8080
            "#,
        );
        assert_eq!(config.baseurl, "https://qvarn.example.com");
        assert_eq!(config.server.port, 8080);
        assert!(config.database.is_some());
        assert!(config.validate().is_ok());
    }

    fn toml_from_str(text: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
