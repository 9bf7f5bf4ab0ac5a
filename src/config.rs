//! Configuration module for webtime-server.
//!
//! The listening port comes from a key/value properties file. Tuning knobs
//! (worker count, queue bound, buffer size, timeouts, log level) come from
//! command-line arguments and an optional TOML file. CLI arguments take
//! precedence over config file values.
//!
//! The resolved [`Config`] is built once at startup and never mutated.

use crate::properties::Properties;
use clap::Parser;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "webtime-server")]
#[command(author = "webtime-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A thread-pooled TCP time server", long_about = None)]
pub struct CliArgs {
    /// Path to the properties file holding SERVER_PORT
    #[arg(default_value = "default.properties")]
    pub properties: PathBuf,

    /// Path to TOML tuning file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of queued connections (0 = unbounded)
    #[arg(short = 'q', long)]
    pub queue_capacity: Option<usize>,

    /// Size of the per-connection read buffer in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Read/write timeout on client sockets in milliseconds (0 = none)
    #[arg(short = 't', long)]
    pub io_timeout_ms: Option<u64>,

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
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Number of worker threads
    #[serde(default)]
    pub workers: usize,
    /// Bound on pending connections waiting for a worker
    #[serde(default)]
    pub queue_capacity: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 0,
            backlog: default_backlog(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Read buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Socket read/write timeout in milliseconds
    #[serde(default)]
    pub io_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            io_timeout_ms: 0,
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

/// Largest per-connection read buffer. Each worker allocates one per request.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

fn default_backlog() -> i32 {
    100
}

fn default_buffer_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub workers: usize,
    pub queue_capacity: usize,
    pub backlog: i32,
    pub buffer_size: usize,
    pub io_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            workers: 0,
            queue_capacity: 0,
            backlog: default_backlog(),
            buffer_size: default_buffer_size(),
            io_timeout: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args, the properties file and an optional
    /// TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve already-parsed CLI arguments into a configuration.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let properties = Properties::load(&cli.properties)?;

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config, &properties)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    fn merge(cli: CliArgs, toml: TomlConfig, properties: &Properties) -> Result<Self, ConfigError> {
        let io_timeout_ms = cli.io_timeout_ms.unwrap_or(toml.connection.io_timeout_ms);

        let config = Config {
            port: properties.port()?,
            workers: cli.workers.unwrap_or(toml.server.workers),
            queue_capacity: cli.queue_capacity.unwrap_or(toml.server.queue_capacity),
            backlog: toml.server.backlog,
            buffer_size: cli.buffer_size.unwrap_or(toml.connection.buffer_size),
            io_timeout: (io_timeout_ms > 0).then(|| Duration::from_millis(io_timeout_ms)),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be >= 1".to_string()));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "buffer_size must be <= {MAX_BUFFER_SIZE}"
            )));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog must be >= 1".to_string()));
        }
        Ok(())
    }

    /// Number of worker threads to spawn. Zero means one per CPU core.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus()
        } else {
            self.workers
        }
    }

    /// Address to bind: IPv4, any interface.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration loading errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Missing property '{0}'")]
    MissingProperty(String),

    #[error("Invalid value '{value}' for property '{key}'")]
    InvalidProperty { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
