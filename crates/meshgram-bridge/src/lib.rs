//! Meshgram Bridge - mesh radio ⇄ chat group bridge engine
//!
//! This crate bridges a packet-radio mesh network and a chat-platform
//! group, translating messages, location updates, and node telemetry in
//! both directions while surviving transient failures on either side.
//!
//! # Architecture
//!
//! The engine owns two injected adapters and a pipeline of leaf
//! components:
//!
//! 1. **Adapters** - [`MeshAdapter`] / [`ChatAdapter`] capability traits
//!    over the concrete transports (serial device, bot API)
//! 2. **Translation** - [`Translator`] pure mesh ⇄ chat mapping,
//!    [`CommandRouter`] for `/status`, `/bell`, `/node`, `/user`
//! 3. **Delivery** - [`RetryQueue`] with per-item backoff behind a
//!    per-channel [`RateLimiter`]; nothing is dropped, only gated
//! 4. **Supervision** - [`BridgeEngine`] event loop with independent
//!    reconnect backoff per adapter and heartbeat-based staleness
//!
//! # Message Flow
//!
//! ## Mesh → chat
//!
//! 1. Adapter decodes a packet into a [`meshgram_core::MeshMessage`]
//! 2. [`DeduplicationCache`] drops flood repeats
//! 3. [`NodeRegistry`] records last-seen/position/telemetry
//! 4. [`Translator`] renders a chat post (total, placeholders for
//!    unknown payload kinds)
//! 5. [`RetryQueue`] delivers through the chat [`RateLimiter`] bucket
//!
//! ## Chat → mesh
//!
//! 1. Adapter yields a [`meshgram_core::ChatMessage`]
//! 2. Commands go through [`CommandRouter`]; text and locations through
//!    [`Translator`]
//! 3. [`RetryQueue`] delivers through the mesh bucket, accumulating
//!    while the radio link is down
//!
//! # Example
//!
//! ```rust,ignore
//! use meshgram_bridge::{BridgeConfigBuilder, BridgeEngine};
//!
//! let config = BridgeConfigBuilder::new()
//!     .serial_device("/dev/ttyUSB0")
//!     .bot_token(std::env::var("BOT_TOKEN")?)
//!     .chat_id(-1001234567890)
//!     .authorize_user(111111111)
//!     .build();
//!
//! // Concrete transports implement the adapter traits
//! let (engine, handle) = BridgeEngine::new(mesh, chat, config)?;
//! tokio::spawn(engine.run());
//! ```

#![warn(missing_docs)]

pub mod adapter;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod nodes;
pub mod ratelimit;
pub mod retry;
pub mod router;
pub mod translator;

// Testing utilities (mock adapters)
pub mod test_utils;

// Re-exports for convenience
pub use adapter::{ChatAdapter, ChatEvent, LinkState, MeshAdapter, MeshEvent};
pub use config::{
    BridgeConfig, BridgeConfigBuilder, BucketConfig, ChatConfig, ConnectionConfig, EngineConfig,
    MeshConfig, RateLimitConfig, ReconnectConfig, RetryConfig,
};
pub use dedup::{DeduplicationCache, PacketKey};
pub use engine::{BridgeCommand, BridgeEngine, BridgeHandle, BridgeStats};
pub use error::{BridgeError, Result};
pub use nodes::NodeRegistry;
pub use ratelimit::{Channel, RateLimiter};
pub use retry::{
    DeliveryFailure, FailureKind, OutboundItem, OutboundPayload, Priority, RetryQueue,
};
pub use router::{
    is_command, AuthorizationSet, CommandOutcome, CommandRouter, Disposition, RouterContext,
    DENIAL_REPLY,
};
pub use translator::{format_timestamp, format_uptime, Translator};

// Protocol constants re-exports
pub use config::{
    DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE, DEFAULT_RETRY_CAP,
    MESH_MAX_TEXT,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
