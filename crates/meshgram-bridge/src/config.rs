//! Configuration types for the bridge
//!
//! This module provides the configuration structures consumed by
//! [`crate::engine::BridgeEngine`]: mesh and chat endpoint settings,
//! per-channel rate limits, retry/backoff tuning, and reconnection
//! behavior. `validate()` is the single fatal gate: everything it
//! rejects must be fixed before any adapter connects.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use meshgram_core::NodeId;

use crate::error::{BridgeError, Result};

/// Maximum text length accepted by the mesh radio, in bytes
pub const MESH_MAX_TEXT: usize = 230;

/// Default heartbeat timeout before a node is considered stale
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default base delay for retry backoff
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// Default cap for retry backoff
pub const DEFAULT_RETRY_CAP: Duration = Duration::from_secs(60);

/// Default maximum delivery attempts per outbound item
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Main configuration for the bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Mesh side settings
    #[serde(default)]
    pub mesh: MeshConfig,

    /// Chat side settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// Per-channel rate limits
    #[serde(default)]
    pub rate: RateLimitConfig,

    /// Retry queue behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// Reconnection behavior
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Engine housekeeping
    #[serde(default)]
    pub engine: EngineConfig,
}

impl BridgeConfig {
    /// Validate the configuration.
    ///
    /// This is the only fatal error path in the bridge: a failure here
    /// is surfaced before any adapter connects.
    pub fn validate(&self) -> Result<()> {
        if self.chat.bot_token.is_empty() {
            return Err(BridgeError::MissingConfig("chat.bot_token"));
        }
        if self.chat.chat_id == 0 {
            return Err(BridgeError::MissingConfig("chat.chat_id"));
        }
        match &self.mesh.connection {
            ConnectionConfig::Serial { device } if device.is_empty() => {
                return Err(BridgeError::MissingConfig("mesh.connection.device"));
            }
            ConnectionConfig::Tcp { host, .. } if host.is_empty() => {
                return Err(BridgeError::MissingConfig("mesh.connection.host"));
            }
            _ => {}
        }
        if self.retry.max_attempts == 0 {
            return Err(BridgeError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(BridgeError::InvalidConfig(
                "retry.base_delay exceeds retry.max_delay".to_string(),
            ));
        }
        for (name, bucket) in [("rate.mesh", &self.rate.mesh), ("rate.chat", &self.rate.chat)] {
            if bucket.burst == 0 {
                return Err(BridgeError::InvalidConfig(format!(
                    "{name}.burst must be at least 1"
                )));
            }
            if bucket.refill_interval.is_zero() {
                return Err(BridgeError::InvalidConfig(format!(
                    "{name}.refill_interval must be non-zero"
                )));
            }
        }
        Ok(())
    }
}

/// How the mesh adapter reaches the device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Serial port connection (most common)
    Serial {
        /// Path to serial port (e.g., /dev/ttyUSB0)
        device: String,
    },
    /// TCP connection (for devices with network)
    Tcp {
        /// Host address
        host: String,
        /// Port number
        port: u16,
    },
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig::Serial {
            device: "/dev/ttyUSB0".to_string(),
        }
    }
}

/// Mesh side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Device connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Node that chat-originated messages are addressed to by default
    #[serde(default)]
    pub default_node_id: Option<NodeId>,

    /// Nodes operated locally; these get aliases in rendered output and
    /// are always listed by /status even before their first packet
    #[serde(default)]
    pub local_nodes: Vec<NodeId>,

    /// Silence duration after which a node is marked stale
    #[serde(with = "humantime_serde", default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: Duration,
}

fn default_heartbeat_timeout() -> Duration {
    DEFAULT_HEARTBEAT_TIMEOUT
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            default_node_id: None,
            local_nodes: Vec::new(),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

/// Chat side configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Bot API token
    #[serde(default)]
    pub bot_token: String,

    /// Destination group/chat id
    #[serde(default)]
    pub chat_id: i64,

    /// Users permitted to issue mesh-affecting commands
    #[serde(default)]
    pub authorized_users: Vec<i64>,

    /// Post a chat notice when an adapter reconnects
    #[serde(default)]
    pub notify_reconnect: bool,
}

/// Token bucket settings for one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Bucket capacity (burst size)
    pub burst: u32,

    /// Time to refill one token
    #[serde(with = "humantime_serde")]
    pub refill_interval: Duration,
}

/// Per-channel rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Mesh radio bucket (airtime is the scarce resource)
    pub mesh: BucketConfig,

    /// Chat API bucket (per-bot rate caps)
    pub chat: BucketConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            mesh: BucketConfig {
                burst: 3,
                refill_interval: Duration::from_secs(5),
            },
            chat: BucketConfig {
                burst: 20,
                refill_interval: Duration::from_secs(1),
            },
        }
    }
}

/// Retry queue behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay before the first retry
    #[serde(with = "humantime_serde", default = "default_retry_base")]
    pub base_delay: Duration,

    /// Cap on the backoff delay
    #[serde(with = "humantime_serde", default = "default_retry_cap")]
    pub max_delay: Duration,

    /// Maximum delivery attempts per item
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long an item may wait in the queue before expiring
    #[serde(with = "humantime_serde", default = "default_item_ttl")]
    pub item_ttl: Duration,
}

fn default_retry_base() -> Duration {
    DEFAULT_RETRY_BASE
}

fn default_retry_cap() -> Duration {
    DEFAULT_RETRY_CAP
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_item_ttl() -> Duration {
    Duration::from_secs(300)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RETRY_BASE,
            max_delay: DEFAULT_RETRY_CAP,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            item_ttl: Duration::from_secs(300),
        }
    }
}

/// Reconnection behavior, applied independently per adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Maximum delay between reconnection attempts
    #[serde(with = "humantime_serde", default = "default_max_reconnect_delay")]
    pub max_delay: Duration,
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_reconnect_delay() -> Duration {
    Duration::from_secs(60)
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Engine housekeeping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between heartbeat scans of the node registry
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Size of the inbound mesh deduplication cache
    #[serde(default = "default_dedup_cache_size")]
    pub dedup_cache_size: usize,

    /// TTL for deduplication cache entries
    #[serde(with = "humantime_serde", default = "default_dedup_ttl")]
    pub dedup_ttl: Duration,

    /// Grace period for flushing the retry queue at shutdown
    #[serde(with = "humantime_serde", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_dedup_cache_size() -> usize {
    1000
}

fn default_dedup_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            dedup_cache_size: 1000,
            dedup_ttl: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Builder for [`BridgeConfig`]
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the serial device path
    pub fn serial_device(mut self, device: impl Into<String>) -> Self {
        self.config.mesh.connection = ConnectionConfig::Serial {
            device: device.into(),
        };
        self
    }

    /// Set a TCP device address
    pub fn tcp_device(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.mesh.connection = ConnectionConfig::Tcp {
            host: host.into(),
            port,
        };
        self
    }

    /// Set the default destination node for chat-originated messages
    pub fn default_node(mut self, id: NodeId) -> Self {
        self.config.mesh.default_node_id = Some(id);
        self
    }

    /// Register a locally operated node
    pub fn local_node(mut self, id: NodeId) -> Self {
        self.config.mesh.local_nodes.push(id);
        self
    }

    /// Set the heartbeat timeout
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.mesh.heartbeat_timeout = timeout;
        self
    }

    /// Set the bot token
    pub fn bot_token(mut self, token: impl Into<String>) -> Self {
        self.config.chat.bot_token = token.into();
        self
    }

    /// Set the destination chat id
    pub fn chat_id(mut self, id: i64) -> Self {
        self.config.chat.chat_id = id;
        self
    }

    /// Authorize a chat user for mesh-affecting commands
    pub fn authorize_user(mut self, user_id: i64) -> Self {
        self.config.chat.authorized_users.push(user_id);
        self
    }

    /// Enable or disable the reconnect notice
    pub fn notify_reconnect(mut self, enabled: bool) -> Self {
        self.config.chat.notify_reconnect = enabled;
        self
    }

    /// Set retry backoff bounds
    pub fn retry_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.config.retry.base_delay = base;
        self.config.retry.max_delay = cap;
        self
    }

    /// Set the maximum delivery attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Set the outbound item TTL
    pub fn item_ttl(mut self, ttl: Duration) -> Self {
        self.config.retry.item_ttl = ttl;
        self
    }

    /// Set the mesh channel rate limit
    pub fn mesh_rate(mut self, burst: u32, refill_interval: Duration) -> Self {
        self.config.rate.mesh = BucketConfig {
            burst,
            refill_interval,
        };
        self
    }

    /// Set the chat channel rate limit
    pub fn chat_rate(mut self, burst: u32, refill_interval: Duration) -> Self {
        self.config.rate.chat = BucketConfig {
            burst,
            refill_interval,
        };
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
            .bot_token("123456:token")
            .chat_id(-1000123)
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.mesh.heartbeat_timeout, DEFAULT_HEARTBEAT_TIMEOUT);
    }

    #[test]
    fn test_validate_requires_chat_settings() {
        let config = BridgeConfig::default();
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "MISSING_CONFIG");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validate_accepts_minimal() {
        let config = minimal().build();
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = minimal().max_attempts(0).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config = minimal()
            .retry_backoff(Duration::from_secs(120), Duration::from_secs(60))
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = minimal()
            .serial_device("/dev/ttyACM0")
            .default_node("!a1b2c3d4".parse().unwrap())
            .local_node("!a1b2c3d4".parse().unwrap())
            .authorize_user(42)
            .notify_reconnect(true)
            .build();

        assert!(matches!(
            config.mesh.connection,
            ConnectionConfig::Serial { ref device } if device == "/dev/ttyACM0"
        ));
        assert_eq!(config.chat.authorized_users, vec![42]);
        assert!(config.chat.notify_reconnect);
        config.validate().unwrap();
    }

    #[test]
    fn test_duration_round_trip() {
        let config = minimal()
            .heartbeat_timeout(Duration::from_secs(90))
            .build();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"1m 30s\""));

        let back: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mesh.heartbeat_timeout, Duration::from_secs(90));
    }
}
