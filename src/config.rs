//! Configuration module for the smtp-stub server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Port used when neither the command line nor the config file names one.
pub const DEFAULT_PORT: u16 = 2525;

/// Command-line arguments for the stub server
#[derive(Parser, Debug)]
#[command(name = "smtp-stub")]
#[command(version = "0.1.0")]
#[command(
    about = "An SMTP server that echoes what it gets from clients to stdout",
    long_about = None
)]
pub struct CliArgs {
    /// Port to listen on (defaults to 2525)
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host or address to bind to (e.g., 127.0.0.1)
    #[arg(short = 'l', long)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Host or address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
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

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    ///
    /// An unparseable port makes clap print usage and exit nonzero.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args over the TOML file they point at, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// The `host:port` pair as a display string.
    pub fn listen(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::FileRead(_, e) => Some(e),
            ConfigError::TomlParse(_, e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("smtp-stub").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = Config::from_args(parse(&[]).unwrap()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 2525);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.listen(), "0.0.0.0:2525");
    }

    #[test]
    fn test_positional_port() {
        let config = Config::from_args(parse(&["2626"]).unwrap()).unwrap();
        assert_eq!(config.port, 2626);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        assert!(parse(&["smtp"]).is_err());
        assert!(parse(&["70000"]).is_err());
        assert!(parse(&["0"]).is_err());
        assert!(parse(&["-5"]).is_err());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 2600

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 2600);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_toml_partial_uses_defaults() {
        let config: TomlConfig = toml::from_str("[server]\nport = 25\n").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 25);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_cli_overrides_file() {
        let path = std::env::temp_dir().join(format!("smtp-stub-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[server]\nhost = \"127.0.0.1\"\nport = 2600\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();

        let path_str = path.to_str().unwrap();
        let config = Config::from_args(parse(&["--config", path_str, "2700"]).unwrap()).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 2700);
        assert_eq!(config.log_level, "warn");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_config_file() {
        let cli = parse(&["--config", "/nonexistent/smtp-stub.toml"]).unwrap();
        match Config::from_args(cli) {
            Err(ConfigError::FileRead(path, _)) => {
                assert_eq!(path, PathBuf::from("/nonexistent/smtp-stub.toml"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
