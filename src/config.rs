//! Configuration for the echo server and the benchmark client.
//!
//! Values come from command-line flags, environment variables and an
//! optional TOML file. Flags and environment variables take precedence over
//! file values, which take precedence over built-in defaults.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Port used when none is configured or the configured one is invalid.
pub const DEFAULT_PORT: u16 = 8080;

/// Receive buffer size of one echo session.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Minimum reactor pool size when sized from hardware parallelism.
const MIN_WORKERS: usize = 2;

/// Server I/O backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Readiness-based event loops (epoll/kqueue), one per worker thread.
    #[default]
    Mio,
    /// Multi-threaded tokio runtime, one task per connection.
    Tokio,
}

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "echo-server")]
#[command(version, about = "TCP echo server", long_about = None)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long, env = "ECHO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on. Invalid values fall back to 8080.
    #[arg(short, long, env = "PORT")]
    pub port: Option<String>,

    /// Address to bind to
    #[arg(long, env = "SERVER_HOST")]
    pub host: Option<String>,

    /// Number of reactor threads (defaults to available parallelism, min 2)
    #[arg(short, long, env = "ECHO_WORKERS")]
    pub workers: Option<usize>,

    /// I/O backend
    #[arg(long, env = "ECHO_RUNTIME", value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Receive buffer size per session in bytes
    #[arg(long, env = "ECHO_BUFFER_SIZE")]
    pub buffer_size: Option<usize>,

    /// Maximum concurrent sessions across all reactor threads (unbounded when unset)
    #[arg(long, env = "ECHO_MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the benchmark client
#[derive(Parser, Debug, Default)]
#[command(name = "echo-client")]
#[command(version, about = "Concurrent TCP echo latency client", long_about = None)]
pub struct ClientArgs {
    /// Path to TOML configuration file
    #[arg(short, long, env = "ECHO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server host name or address
    #[arg(long, env = "SERVER_IP")]
    pub server_ip: Option<String>,

    /// Server port
    #[arg(long, env = "SERVER_PORT")]
    pub server_port: Option<u16>,

    /// Base identifier; workers are named `<base>-<index>`
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    /// Messages sent by each worker
    #[arg(long, env = "NUM_MESSAGES_PER_CLIENT")]
    pub messages: Option<usize>,

    /// Number of concurrent workers
    #[arg(long, env = "NUM_CONCURRENT_CLIENTS")]
    pub clients: Option<usize>,

    /// Connect timeout in milliseconds (no timeout when unset)
    #[arg(long, env = "CONNECT_TIMEOUT_MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub connect_timeout_ms: Option<u64>,

    /// Read/write timeout in milliseconds (no timeout when unset)
    #[arg(long, env = "IO_TIMEOUT_MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub io_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[server]` table
#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub workers: Option<usize>,
    pub runtime: Option<RuntimeType>,
    pub buffer_size: Option<usize>,
    pub max_connections: Option<usize>,
}

/// `[client]` table
#[derive(Debug, Deserialize, Default)]
pub struct ClientSection {
    pub server_ip: Option<String>,
    pub server_port: Option<u16>,
    pub client_id: Option<String>,
    pub messages_per_client: Option<usize>,
    pub concurrent_clients: Option<usize>,
    pub connect_timeout_ms: Option<u64>,
    pub io_timeout_ms: Option<u64>,
}

/// `[logging]` table
#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub level: Option<String>,
}

impl ConfigFile {
    /// Read the TOML file at `path`, or return an empty configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }
}

/// Pick the log level: CLI flag, then the `[logging]` table, then `info`.
pub fn log_level(cli: Option<&str>, file: &ConfigFile) -> String {
    cli.map(str::to_string)
        .or_else(|| file.logging.level.clone())
        .unwrap_or_else(|| "info".to_string())
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub runtime: RuntimeType,
    pub buffer_size: usize,
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            workers: None,
            runtime: RuntimeType::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_connections: None,
        }
    }
}

impl ServerConfig {
    /// Merge CLI/env arguments over the file configuration.
    pub fn resolve(args: ServerArgs, file: ConfigFile) -> Self {
        let defaults = Self::default();
        let section = file.server;

        let port = match args.port {
            Some(raw) => parse_port(&raw),
            None => section.port.unwrap_or(defaults.port),
        };

        Self {
            host: args.host.or(section.host).unwrap_or(defaults.host),
            port,
            workers: args.workers.or(section.workers),
            runtime: args.runtime.or(section.runtime).unwrap_or(defaults.runtime),
            buffer_size: args
                .buffer_size
                .or(section.buffer_size)
                .filter(|&size| size > 0)
                .unwrap_or(defaults.buffer_size),
            max_connections: args.max_connections.or(section.max_connections),
        }
    }

    /// Number of reactor threads to run.
    ///
    /// An explicit setting wins; otherwise the hardware parallelism with a
    /// floor of two. Failing to query parallelism is fatal.
    pub fn worker_count(&self) -> Result<usize, ConfigError> {
        match self.workers {
            Some(0) => {
                warn!("Worker count of 0 is invalid; using 1 worker");
                return Ok(1);
            }
            Some(workers) => return Ok(workers),
            None => {}
        }
        let parallelism = std::thread::available_parallelism().map_err(ConfigError::Parallelism)?;
        Ok(parallelism.get().max(MIN_WORKERS))
    }
}

/// Parse a port, warning and falling back to the default when invalid.
fn parse_port(raw: &str) -> u16 {
    match raw.trim().parse::<u16>() {
        Ok(port) => port,
        Err(e) => {
            warn!(
                value = raw,
                error = %e,
                default = DEFAULT_PORT,
                "Invalid PORT; using default port"
            );
            DEFAULT_PORT
        }
    }
}

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_ip: String,
    pub server_port: u16,
    pub client_id: String,
    pub messages_per_client: usize,
    pub concurrent_clients: usize,
    pub connect_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_ip: "localhost".to_string(),
            server_port: DEFAULT_PORT,
            client_id: "default_client_pod".to_string(),
            messages_per_client: 1,
            concurrent_clients: 1,
            connect_timeout: None,
            io_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Merge CLI/env arguments over the file configuration.
    pub fn resolve(args: ClientArgs, file: ConfigFile) -> Self {
        let defaults = Self::default();
        let section = file.client;

        Self {
            server_ip: args.server_ip.or(section.server_ip).unwrap_or(defaults.server_ip),
            server_port: args
                .server_port
                .or(section.server_port)
                .unwrap_or(defaults.server_port),
            client_id: args.client_id.or(section.client_id).unwrap_or(defaults.client_id),
            messages_per_client: args
                .messages
                .or(section.messages_per_client)
                .unwrap_or(defaults.messages_per_client),
            concurrent_clients: args
                .clients
                .or(section.concurrent_clients)
                .unwrap_or(defaults.concurrent_clients),
            connect_timeout: millis(args.connect_timeout_ms.or(section.connect_timeout_ms)),
            io_timeout: millis(args.io_timeout_ms.or(section.io_timeout_ms)),
        }
    }
}

fn millis(value: Option<u64>) -> Option<Duration> {
    value.filter(|&ms| ms > 0).map(Duration::from_millis)
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Failed to determine available parallelism: {0}")]
    Parallelism(#[source] std::io::Error),
}
