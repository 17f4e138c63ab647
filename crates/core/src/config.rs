//! Chatroom Configuration
//!
//! Configuration structures with serde defaults, so an empty document (or no
//! document at all) yields a runnable server.

use crate::error::ChatroomError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default gateway host
pub const DEFAULT_GATEWAY_HOST: &str = "127.0.0.1";
/// Default gateway port
pub const DEFAULT_GATEWAY_PORT: u16 = 3000;
/// Default WebSocket path
pub const DEFAULT_WS_PATH: &str = "/ws";
/// Default interval between presence sweeps (seconds)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
/// Default idle time after which a session is evicted (seconds)
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
/// Default upper bound on announced usernames (characters)
pub const DEFAULT_MAX_USERNAME_LEN: usize = 64;

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Gateway (transport) configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Presence tracking configuration
    #[serde(default)]
    pub presence: PresenceConfig,
}

// ============================================================================
// Gateway Config
// ============================================================================

/// Gateway server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host
    #[serde(default = "GatewayConfig::default_host")]
    pub host: String,
    /// Gateway port (0 binds an ephemeral port)
    #[serde(default = "GatewayConfig::default_port")]
    pub port: u16,
    /// WebSocket path
    #[serde(default = "GatewayConfig::default_ws_path")]
    pub ws_path: String,
    /// Accept handshakes only from this Origin, when set
    #[serde(default)]
    pub allowed_origin: Option<String>,
}

impl GatewayConfig {
    fn default_host() -> String {
        DEFAULT_GATEWAY_HOST.to_string()
    }
    fn default_port() -> u16 {
        DEFAULT_GATEWAY_PORT
    }
    fn default_ws_path() -> String {
        DEFAULT_WS_PATH.to_string()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_GATEWAY_HOST.to_string(),
            port: DEFAULT_GATEWAY_PORT,
            ws_path: DEFAULT_WS_PATH.to_string(),
            allowed_origin: None,
        }
    }
}

// ============================================================================
// Presence Config
// ============================================================================

/// Presence tracking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Seconds between two sweeps of the connection registry
    #[serde(default = "PresenceConfig::default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Seconds a session may stay silent before a sweep evicts it
    #[serde(default = "PresenceConfig::default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Longest accepted username, in characters
    #[serde(default = "PresenceConfig::default_max_username_len")]
    pub max_username_len: usize,
}

impl PresenceConfig {
    fn default_sweep_interval() -> u64 {
        DEFAULT_SWEEP_INTERVAL_SECS
    }
    fn default_idle_timeout() -> u64 {
        DEFAULT_IDLE_TIMEOUT_SECS
    }
    fn default_max_username_len() -> usize {
        DEFAULT_MAX_USERNAME_LEN
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            max_username_len: DEFAULT_MAX_USERNAME_LEN,
        }
    }
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from an explicit file, the first default location
    /// that exists, or built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Config, ChatroomError> {
        let config_path = match path {
            Some(p) => {
                let p = PathBuf::from(p);
                if !p.exists() {
                    return Err(ChatroomError::config_not_found(p.display().to_string()));
                }
                p
            }
            None => match Self::default_paths().into_iter().find(|p| p.exists()) {
                Some(p) => p,
                None => {
                    tracing::debug!("No config file found, using defaults");
                    return Ok(Config::default());
                }
            },
        };

        tracing::debug!("Loading config from {}", config_path.display());
        Self::load_from(&config_path)
    }

    /// Parse a config file
    pub fn load_from(path: &Path) -> Result<Config, ChatroomError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChatroomError::config_parse_error(format!("Failed to read: {}", e)))?;
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yml::from_str(&content)
            .map_err(|e| ChatroomError::config_parse_error(format!("Failed to parse: {}", e)))?;
        Ok(config)
    }

    fn default_paths() -> [PathBuf; 3] {
        [
            home_dir().join(".chatroom/config.yaml"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("chatroom.yaml"),
            PathBuf::from("./chatroom.yaml"),
        ]
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration
    pub fn validate(config: &Config) -> Result<(), ChatroomError> {
        if config.gateway.host.trim().is_empty() {
            return Err(ChatroomError::config_invalid(
                "gateway.host",
                "Host cannot be empty",
            ));
        }

        if !config.gateway.ws_path.starts_with('/') {
            return Err(ChatroomError::config_invalid(
                "gateway.ws_path",
                format!(
                    "WebSocket path '{}' must start with '/'",
                    config.gateway.ws_path
                ),
            ));
        }

        if config.presence.sweep_interval_secs == 0 {
            return Err(ChatroomError::config_invalid(
                "presence.sweep_interval_secs",
                "Sweep interval must be greater than zero",
            ));
        }

        if config.presence.idle_timeout_secs == 0 {
            return Err(ChatroomError::config_invalid(
                "presence.idle_timeout_secs",
                "Idle timeout must be greater than zero",
            ));
        }

        if config.presence.max_username_len == 0 {
            return Err(ChatroomError::config_invalid(
                "presence.max_username_len",
                "Maximum username length must be greater than zero",
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ChatroomError> {
        let content = serde_yml::to_string(self).map_err(|e| {
            ChatroomError::config_parse_error(format!("Serialization failed: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Config {
            gateway: GatewayConfig {
                allowed_origin: Some("http://localhost:5173".to_string()),
                ..GatewayConfig::default()
            },
            presence: PresenceConfig::default(),
        }
    }
}
