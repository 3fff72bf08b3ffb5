//! Configuration module for the fileshare server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Readiness backend driving the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Batched readiness via mio (epoll on Linux, kqueue on macOS).
    Mio,
    /// Linear scan of every tracked descriptor via poll(2).
    Poll,
}

/// Command-line arguments for the fileshare server
#[derive(Parser, Debug)]
#[command(name = "fileshare-server")]
#[command(author = "fileshare authors")]
#[command(version = "0.1.0")]
#[command(about = "Streams one file to a bounded number of TCP clients", long_about = None)]
pub struct CliArgs {
    /// File to distribute
    pub source: PathBuf,

    /// Total number of clients to serve before exiting
    pub max_clients: usize,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:1337)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Readiness backend
    #[arg(short = 'b', long, value_enum)]
    pub backend: Option<Backend>,

    /// Bytes read from the source and written to a client per readiness event
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Length of the pending-connection queue
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Readiness backend
    #[serde(default = "default_backend")]
    pub backend: Backend,
    /// Listen queue length
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backend: default_backend(),
            backlog: default_backlog(),
        }
    }
}

/// Transfer-related configuration
#[derive(Debug, Deserialize)]
pub struct TransferConfig {
    /// Block size in bytes
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
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

fn default_listen() -> String {
    "0.0.0.0:1337".to_string()
}

fn default_backend() -> Backend {
    Backend::Mio
}

fn default_backlog() -> i32 {
    10
}

/// Upper bound on `MAX_CLIENTS`; keeps slot tags clear of the reserved
/// tokens and the poll set size within `nfds_t`.
pub const MAX_CLIENTS_LIMIT: usize = 65_536;

fn default_block_size() -> usize {
    crate::runtime::protocol::BLOCK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub source: PathBuf,
    pub max_clients: usize,
    pub listen: SocketAddr,
    pub backend: Backend,
    pub block_size: usize,
    pub backlog: i32,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve already-parsed CLI arguments against the optional TOML file.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddr = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        if cli.max_clients == 0 {
            return Err(ConfigError::ZeroClients);
        }
        if cli.max_clients > MAX_CLIENTS_LIMIT {
            return Err(ConfigError::TooManyClients(cli.max_clients));
        }

        let block_size = cli.block_size.unwrap_or(toml_config.transfer.block_size);
        if block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }

        Ok(Config {
            source: cli.source,
            max_clients: cli.max_clients,
            listen,
            backend: cli.backend.unwrap_or(toml_config.server.backend),
            block_size,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String),
    ZeroClients,
    TooManyClients(usize),
    ZeroBlockSize,
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
            ConfigError::InvalidListen(addr) => {
                write!(f, "Invalid listen address '{}'", addr)
            }
            ConfigError::ZeroClients => write!(f, "Number of clients must be positive"),
            ConfigError::TooManyClients(n) => write!(
                f,
                "Number of clients {} exceeds the limit of {}",
                n, MAX_CLIENTS_LIMIT
            ),
            ConfigError::ZeroBlockSize => write!(f, "Block size must be positive"),
        }
    }
}

impl std::error::Error for ConfigError {}
