//! Configuration module for the appendlog server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the log server
#[derive(Parser, Debug)]
#[command(name = "appendlog")]
#[command(author = "appendlog authors")]
#[command(version = "0.1.0")]
#[command(about = "Appends newline-terminated records to a shared log and echoes the log back", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Detach from the controlling terminal and run in the background
    #[arg(short, long)]
    pub daemon: bool,

    /// Host to bind to (defaults to every local address)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path of the shared log file
    #[arg(short = 'f', long)]
    pub store: Option<PathBuf>,

    /// Append diagnostic output to this file instead of stdout
    #[arg(long)]
    pub log_file: Option<PathBuf>,

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
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to; absent means all local addresses
    pub host: Option<String>,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pending connection queue length
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Run detached from the terminal
    #[serde(default)]
    pub daemon: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            backlog: default_backlog(),
            daemon: false,
        }
    }
}

/// Log store configuration
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Path of the shared log file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Bytes requested from the socket per receive
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Sync file data after every append
    #[serde(default = "default_sync")]
    pub sync: bool,
    /// Keep the log file when the server shuts down
    #[serde(default)]
    pub retain_on_exit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            chunk_size: default_chunk_size(),
            sync: default_sync(),
            retain_on_exit: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional file to write logs to
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_port() -> u16 {
    9000
}

fn default_backlog() -> u32 {
    10
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/tmp/appendlog.data")
}

fn default_chunk_size() -> usize {
    1024
}

fn default_sync() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: Option<String>,
    pub port: u16,
    pub backlog: u32,
    pub daemon: bool,
    pub store_path: PathBuf,
    pub chunk_size: usize,
    pub sync: bool,
    pub retain_on_exit: bool,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge parsed CLI args over a TOML config and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            host: cli.host.or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: toml_config.server.backlog,
            daemon: cli.daemon || toml_config.server.daemon,
            store_path: cli.store.unwrap_or(toml_config.store.path),
            chunk_size: toml_config.store.chunk_size,
            sync: toml_config.store.sync,
            retain_on_exit: toml_config.store.retain_on_exit,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            log_file: cli.log_file.or(toml_config.logging.file),
        };

        if config.chunk_size == 0 {
            return Err(ConfigError::Invalid("store.chunk_size must be greater than 0"));
        }
        if config.backlog == 0 {
            return Err(ConfigError::Invalid("server.backlog must be greater than 0"));
        }

        Ok(config)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
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
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
