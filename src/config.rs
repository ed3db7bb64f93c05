//! Configuration for the relay server and the chat client.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::DebugLevel;
use clap::Parser;
use serde::Deserialize;
use std::io::{self, BufRead, IsTerminal, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the relay server
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(author = "chat-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP chat relay with per-client traffic logs", long_about = None)]
pub struct CliArgs {
    /// Port to listen on
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Directory holding per-client traffic logs
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Read tracing: 0 off, 1 payloads, 2 hex dumps (prompted when omitted)
    #[arg(short = 'd', long)]
    pub debug_level: Option<DebugLevel>,

    /// Name the server announces in its handshake
    #[arg(long)]
    pub server_name: Option<String>,

    /// Relay from the first byte without a metadata handshake
    #[arg(long)]
    pub no_handshake: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Command-line arguments for the chat client
#[derive(Parser, Debug)]
#[command(name = "chat-client")]
#[command(author = "chat-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "Terminal client for chat-relay", long_about = None)]
pub struct ClientArgs {
    /// Server IP address
    pub server_ip: IpAddr,

    /// Server port
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Debug mode: report sent and received byte counts
    #[arg(short = 'D')]
    pub debug: bool,

    /// Display name (prompted when omitted)
    #[arg(short, long)]
    pub name: Option<String>,

    /// File holding this client's persistent UUID
    #[arg(long)]
    pub uuid_file: Option<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds between idle heartbeats
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Name announced in the handshake
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Whether connections start with a metadata handshake
    #[serde(default = "default_handshake")]
    pub handshake: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
            name: default_server_name(),
            handshake: default_handshake(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory holding per-client traffic logs
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Read tracing level (0, 1 or 2)
    pub debug_level: Option<u8>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            debug_level: None,
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientFileConfig {
    /// Display name
    pub name: Option<String>,
    /// File holding the persistent UUID
    #[serde(default = "default_uuid_file")]
    pub uuid_file: PathBuf,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        Self {
            name: None,
            uuid_file: default_uuid_file(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_idle_timeout() -> u64 {
    10
}

fn default_server_name() -> String {
    "chat-relay".to_string()
}

fn default_handshake() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("client_files")
}

fn default_uuid_file() -> PathBuf {
    PathBuf::from(".client_uuid")
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub log_dir: PathBuf,
    pub debug_level: DebugLevel,
    pub server_name: String,
    pub handshake: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    ///
    /// A missing port is a usage error and exits with status 2.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();
        let toml_config = read_toml(cli.config.as_ref())?;

        let debug_level = match cli.debug_level {
            Some(level) => level,
            None => match toml_config.logging.debug_level {
                Some(level) => DebugLevel::from_level(level)
                    .ok_or(ConfigError::InvalidDebugLevel(level))?,
                None => prompt_debug_level()?,
            },
        };

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            idle_timeout: Duration::from_secs(toml_config.server.idle_timeout),
            log_dir: cli.log_dir.unwrap_or(toml_config.logging.dir),
            debug_level,
            server_name: cli.server_name.unwrap_or(toml_config.server.name),
            handshake: !cli.no_handshake && toml_config.server.handshake,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Configuration with defaults for the given port, without reading the
    /// command line.
    pub fn with_port(port: u16) -> Self {
        let toml_config = TomlConfig::default();
        Config {
            host: toml_config.server.host,
            port,
            max_connections: toml_config.server.max_connections,
            idle_timeout: Duration::from_secs(toml_config.server.idle_timeout),
            log_dir: toml_config.logging.dir,
            debug_level: DebugLevel::Off,
            server_name: toml_config.server.name,
            handshake: toml_config.server.handshake,
            log_level: toml_config.logging.level,
        }
    }
}

/// Final resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_ip: IpAddr,
    pub port: u16,
    pub debug: bool,
    pub name: Option<String>,
    pub uuid_file: PathBuf,
}

impl ClientConfig {
    /// Merge parsed client arguments over the optional TOML file.
    pub fn from_args(args: ClientArgs) -> Result<Self, ConfigError> {
        let toml_config = read_toml(args.config.as_ref())?;

        Ok(ClientConfig {
            server_ip: args.server_ip,
            port: args.port,
            debug: args.debug,
            name: args.name.or(toml_config.client.name),
            uuid_file: args.uuid_file.unwrap_or(toml_config.client.uuid_file),
        })
    }
}

fn read_toml(path: Option<&PathBuf>) -> Result<TomlConfig, ConfigError> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::FileRead(path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.clone(), e))
        }
        None => Ok(TomlConfig::default()),
    }
}

/// Ask for the debug level on an interactive terminal; default to off
/// otherwise.
fn prompt_debug_level() -> Result<DebugLevel, ConfigError> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(DebugLevel::Off);
    }

    let mut line = String::new();
    loop {
        print!("Run server in debug mode [0- No 1- Normal Debug 2- Advance Debug]:\t");
        io::stdout().flush().map_err(ConfigError::Prompt)?;

        line.clear();
        if stdin.lock().read_line(&mut line).map_err(ConfigError::Prompt)? == 0 {
            return Ok(DebugLevel::Off);
        }

        match line.parse() {
            Ok(level) => return Ok(level),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidDebugLevel(u8),
    Prompt(std::io::Error),
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
            ConfigError::InvalidDebugLevel(level) => {
                write!(f, "Invalid debug level {}, expected 0, 1 or 2", level)
            }
            ConfigError::Prompt(e) => write!(f, "Failed to read debug level: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.server.idle_timeout, 10);
        assert!(config.server.handshake);
        assert_eq!(config.logging.dir, PathBuf::from("client_files"));
        assert_eq!(config.client.uuid_file, PathBuf::from(".client_uuid"));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            max_connections = 16
            idle_timeout = 30
            name = "lobby"
            handshake = false

            [logging]
            level = "debug"
            dir = "/var/log/relay"
            debug_level = 2

            [client]
            name = "alice"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.server.idle_timeout, 30);
        assert_eq!(config.server.name, "lobby");
        assert!(!config.server.handshake);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.dir, PathBuf::from("/var/log/relay"));
        assert_eq!(config.logging.debug_level, Some(2));
        assert_eq!(config.client.name.as_deref(), Some("alice"));
        assert_eq!(config.client.uuid_file, PathBuf::from(".client_uuid"));
    }

    #[test]
    fn test_server_args() {
        let args = CliArgs::try_parse_from([
            "chat-relay",
            "9000",
            "--max-connections",
            "8",
            "--debug-level",
            "1",
            "--no-handshake",
        ])
        .unwrap();
        assert_eq!(args.port, 9000);
        assert_eq!(args.max_connections, Some(8));
        assert_eq!(args.debug_level, Some(DebugLevel::Normal));
        assert!(args.no_handshake);
    }

    #[test]
    fn test_server_requires_port() {
        let err = CliArgs::try_parse_from(["chat-relay"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_client_args() {
        let args = ClientArgs::try_parse_from(["chat-client", "127.0.0.1", "9000", "-D"]).unwrap();
        assert_eq!(args.server_ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(args.port, 9000);
        assert!(args.debug);

        let config = ClientConfig::from_args(args).unwrap();
        assert_eq!(config.uuid_file, PathBuf::from(".client_uuid"));
        assert!(config.name.is_none());
    }

    #[test]
    fn test_client_rejects_bad_arguments() {
        assert!(ClientArgs::try_parse_from(["chat-client", "127.0.0.1", "0"]).is_err());
        assert!(ClientArgs::try_parse_from(["chat-client", "not-an-ip", "9000"]).is_err());
        assert!(ClientArgs::try_parse_from(["chat-client", "127.0.0.1"]).is_err());
    }
}
