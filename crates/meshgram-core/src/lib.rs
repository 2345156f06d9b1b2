//! Meshgram Core - Data model for the mesh-chat bridge
//!
//! This crate provides the foundational types shared by the meshgram
//! bridge: node identity and state, decoded mesh messages, chat
//! messages, positions, and telemetry. It performs no I/O; the bridge
//! crate builds its pipeline on top of these types.
//!
//! # Modules
//!
//! - [`node`] - Node identifiers and per-node state
//! - [`message`] - Mesh and chat message types
//! - [`position`] - Geographic positions with validation and rounding
//! - [`telemetry`] - Device metrics snapshots
//! - [`error`] - Core validation errors
//!
//! # Example
//!
//! ```rust
//! use meshgram_core::{MeshMessage, MeshPayload, NodeId};
//!
//! let source: NodeId = "!a1b2c3d4".parse().unwrap();
//! let msg = MeshMessage::outgoing(source, None, MeshPayload::Text("hello mesh".into()));
//! assert!(msg.is_broadcast());
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod message;
pub mod node;
pub mod position;
pub mod telemetry;

// Re-exports for convenience
pub use error::{CoreError, Result};
pub use message::{ChatMessage, ChatPost, MeshMessage, MeshPayload};
pub use node::{NodeId, NodeState};
pub use position::{Position, COORDINATE_PRECISION};
pub use telemetry::{TelemetrySnapshot, BATTERY_POWERED};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
