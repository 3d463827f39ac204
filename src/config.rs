//! # Configuration Management
//!
//! Centralized configuration for the authentication gateway.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`AUTH_GATEWAY_*`)
//!
//! ## Protocol Constraints
//! - The RSA modulus is scrambled as exactly 128 bytes, so only 1024-bit keys
//!   are accepted
//! - Blowfish keys must be 4 to 56 bytes
//! - The static key is shared with every client build; changing it breaks
//!   the handshake

use crate::core::codec::{HeaderWidth, DEFAULT_MAX_FRAME_LENGTH};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{DEFAULT_BLOWFISH_KEY_LEN, DEFAULT_PROTOCOL_REVISION, RSA_KEY_BITS};
use crate::utils::crypto::{MAX_KEY_LEN, MIN_KEY_LEN};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default listen address of the login server
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:2106";

/// Default graceful shutdown window
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of frames queued for one connection's socket writer
pub const DEFAULT_WRITER_QUEUE_BOUND: usize = 1024;

/// Static key used to obfuscate the `Init` packet
pub const DEFAULT_STATIC_KEY: [u8; 16] = [
    0x6b, 0x60, 0xcb, 0x5b, 0x82, 0xce, 0x90, 0xb1, 0xcc, 0x2b, 0x6c, 0x55, 0x6c, 0x6c, 0x6c, 0x6c,
];

/// Main gateway configuration that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct GatewayConfig {
    /// Listener and worker settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Handshake key material settings
    #[serde(default)]
    pub crypto: CryptoConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Unparseable values are reported instead of silently ignored.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `AUTH_GATEWAY_ADDRESS` | `server.address` |
    /// | `AUTH_GATEWAY_MAX_CONNECTIONS` | `server.max_connections` |
    /// | `AUTH_GATEWAY_WORKER_THREADS` | `server.worker_threads` |
    /// | `AUTH_GATEWAY_WORKER_QUEUE_BOUND` | `server.worker_queue_bound` |
    /// | `AUTH_GATEWAY_WRITER_QUEUE_BOUND` | `server.writer_queue_bound` |
    /// | `AUTH_GATEWAY_HEADER_WIDTH` | `server.header_width` (`1`, `2`, `4` or the TOML name) |
    /// | `AUTH_GATEWAY_MAX_FRAME_LENGTH` | `server.max_frame_length` |
    /// | `AUTH_GATEWAY_SHUTDOWN_TIMEOUT_MS` | `server.shutdown_timeout` |
    /// | `AUTH_GATEWAY_STATIC_KEY` | `crypto.static_key` (hex) |
    /// | `AUTH_GATEWAY_RSA_KEY_BITS` | `crypto.rsa_key_bits` |
    /// | `AUTH_GATEWAY_BLOWFISH_KEY_LEN` | `crypto.blowfish_key_len` |
    /// | `AUTH_GATEWAY_PROTOCOL_REVISION` | `crypto.protocol_revision` (decimal or `0x` hex) |
    /// | `AUTH_GATEWAY_LOG_LEVEL` | `logging.log_level` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`GatewayConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = EnvSource { lookup };

        if let Some(addr) = (env.lookup)("AUTH_GATEWAY_ADDRESS") {
            config.server.address = addr;
        }
        if let Some(val) = env.parse::<usize>("AUTH_GATEWAY_MAX_CONNECTIONS")? {
            config.server.max_connections = val;
        }
        if let Some(val) = env.parse::<usize>("AUTH_GATEWAY_WORKER_THREADS")? {
            config.server.worker_threads = val;
        }
        if let Some(val) = env.parse::<usize>("AUTH_GATEWAY_WORKER_QUEUE_BOUND")? {
            config.server.worker_queue_bound = val;
        }
        if let Some(val) = env.parse::<usize>("AUTH_GATEWAY_WRITER_QUEUE_BOUND")? {
            config.server.writer_queue_bound = val;
        }
        if let Some(val) = env.parse::<HeaderWidth>("AUTH_GATEWAY_HEADER_WIDTH")? {
            config.server.header_width = val;
        }
        if let Some(val) = env.parse::<usize>("AUTH_GATEWAY_MAX_FRAME_LENGTH")? {
            config.server.max_frame_length = val;
        }
        if let Some(val) = env.parse::<u64>("AUTH_GATEWAY_SHUTDOWN_TIMEOUT_MS")? {
            config.server.shutdown_timeout = Duration::from_millis(val);
        }
        if let Some(raw) = (env.lookup)("AUTH_GATEWAY_STATIC_KEY") {
            config.crypto.static_key = parse_hex("AUTH_GATEWAY_STATIC_KEY", &raw)?;
        }
        if let Some(val) = env.parse::<usize>("AUTH_GATEWAY_RSA_KEY_BITS")? {
            config.crypto.rsa_key_bits = val;
        }
        if let Some(val) = env.parse::<usize>("AUTH_GATEWAY_BLOWFISH_KEY_LEN")? {
            config.crypto.blowfish_key_len = val;
        }
        if let Some(raw) = (env.lookup)("AUTH_GATEWAY_PROTOCOL_REVISION") {
            config.crypto.protocol_revision = parse_revision(&raw)?;
        }
        if let Some(val) = env.parse::<Level>("AUTH_GATEWAY_LOG_LEVEL")? {
            config.logging.log_level = val;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.crypto.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

struct EnvSource<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn parse<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        match (self.lookup)(name) {
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| invalid(name, &raw)),
            None => Ok(None),
        }
    }
}

fn invalid(name: &str, raw: &str) -> ProtocolError {
    ProtocolError::ConfigError(format!("Invalid value for {name}: '{raw}'"))
}

fn parse_hex(name: &str, raw: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = raw
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(invalid(name, raw));
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| invalid(name, raw))
        })
        .collect()
}

fn parse_revision(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };
    parsed.map_err(|_| invalid("AUTH_GATEWAY_PROTOCOL_REVISION", raw))
}

fn default_writer_queue_bound() -> usize {
    DEFAULT_WRITER_QUEUE_BOUND
}

fn default_max_frame_length() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}

/// Listener and worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:2106")
    pub address: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Number of handler worker threads
    pub worker_threads: usize,

    /// Pending packets per worker before readers wait
    pub worker_queue_bound: usize,

    /// Frames queued for one socket writer before the connection is dropped
    #[serde(default = "default_writer_queue_bound")]
    pub writer_queue_bound: usize,

    /// Width of the frame length header
    #[serde(default)]
    pub header_width: HeaderWidth,

    /// Largest accepted frame, header included
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            max_connections: 1000,
            worker_threads: 4,
            worker_queue_bound: 256,
            writer_queue_bound: DEFAULT_WRITER_QUEUE_BOUND,
            header_width: HeaderWidth::default(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:2106')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.worker_threads == 0 {
            errors.push("Worker threads must be greater than 0".to_string());
        } else if self.worker_threads > 1024 {
            errors.push(format!(
                "Worker threads too many: {} (maximum: 1024)",
                self.worker_threads
            ));
        }

        if self.worker_queue_bound == 0 {
            errors.push("Worker queue bound must be greater than 0".to_string());
        } else if self.worker_queue_bound > 1_000_000 {
            errors.push(format!(
                "Worker queue bound too large: {} (max recommended: 1,000,000)",
                self.worker_queue_bound
            ));
        }

        if self.writer_queue_bound == 0 {
            errors.push("Writer queue bound must be greater than 0".to_string());
        } else if self.writer_queue_bound > 1_000_000 {
            errors.push(format!(
                "Writer queue bound too large: {} (max recommended: 1,000,000)",
                self.writer_queue_bound
            ));
        }

        if self.max_frame_length <= self.header_width.size() {
            errors.push(format!(
                "Max frame length too small: {} (must exceed the {}-byte header)",
                self.max_frame_length,
                self.header_width.size()
            ));
        } else if self.max_frame_length > 16 * 1024 * 1024 {
            errors.push(format!(
                "Max frame length too large: {} (maximum: 16 MiB)",
                self.max_frame_length
            ));
        }

        if self.shutdown_timeout.as_millis() < 100 {
            errors.push("Shutdown timeout too short (minimum: 100ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Handshake key material configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CryptoConfig {
    /// XOR key applied to the `Init` packet
    pub static_key: Vec<u8>,

    /// RSA key size in bits
    pub rsa_key_bits: usize,

    /// Session Blowfish key length in bytes
    pub blowfish_key_len: usize,

    /// Revision announced to clients in `Init`
    pub protocol_revision: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            static_key: DEFAULT_STATIC_KEY.to_vec(),
            rsa_key_bits: RSA_KEY_BITS,
            blowfish_key_len: DEFAULT_BLOWFISH_KEY_LEN,
            protocol_revision: DEFAULT_PROTOCOL_REVISION,
        }
    }
}

impl CryptoConfig {
    /// Validate key material configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.static_key.is_empty() {
            errors.push("Static key cannot be empty".to_string());
        }

        if self.rsa_key_bits != RSA_KEY_BITS {
            errors.push(format!(
                "Unsupported RSA key size: {} bits (the Init modulus layout requires {})",
                self.rsa_key_bits, RSA_KEY_BITS
            ));
        }

        if !(MIN_KEY_LEN..=MAX_KEY_LEN).contains(&self.blowfish_key_len) {
            errors.push(format!(
                "Invalid Blowfish key length: {} bytes (valid range: {}-{})",
                self.blowfish_key_len, MIN_KEY_LEN, MAX_KEY_LEN
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level used when `RUST_LOG` is unset
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("auth-gateway"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
