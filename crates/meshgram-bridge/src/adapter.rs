//! Adapter interfaces to the mesh and chat transports
//!
//! The bridge never speaks serial framing or bot HTTP itself; it
//! consumes two capability traits. Concrete transports (serial/TCP
//! device drivers, long-poll bot clients) implement these and are
//! injected at engine construction. Each adapter produces an infinite,
//! restartable event sequence via `next_event()`; after a transport
//! error the engine disconnects, backs off, and calls `connect()` again.

use async_trait::async_trait;

use meshgram_core::{ChatMessage, ChatPost, MeshMessage};

use crate::error::Result;

/// Connection state the engine tracks per adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Successfully connected
    Connected,
}

impl LinkState {
    /// Whether the link is usable for sends
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Inbound event from the mesh transport
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// A decoded packet arrived
    Message(MeshMessage),
    /// Delivery acknowledgement for a previously sent packet
    Ack {
        /// The acknowledged packet id
        packet_id: u32,
    },
}

/// Inbound event from the chat transport
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A message (or command) arrived in the bridged chat
    Message(ChatMessage),
}

/// Capability interface to the mesh transport
///
/// `next_event()` must be cancellation-safe: the engine polls it inside
/// a `select!` loop and may drop the future between events.
#[async_trait]
pub trait MeshAdapter: Send {
    /// Connect to the mesh device
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the device
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Wait for the next inbound event
    async fn next_event(&mut self) -> Result<MeshEvent>;

    /// Send a message to the mesh
    async fn send(&mut self, message: &MeshMessage) -> Result<()>;

    /// Get the adapter name (for logging)
    fn name(&self) -> &str;
}

/// Capability interface to the chat transport
///
/// Same contract as [`MeshAdapter`]: `next_event()` is cancellation-safe
/// and the event sequence restarts after a reconnect.
#[async_trait]
pub trait ChatAdapter: Send {
    /// Connect to the chat backend
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the backend
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Wait for the next inbound event
    async fn next_event(&mut self) -> Result<ChatEvent>;

    /// Post a message to the bridged chat
    async fn send(&mut self, post: &ChatPost) -> Result<()>;

    /// Get the adapter name (for logging)
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_state_display() {
        assert_eq!(LinkState::Connected.to_string(), "connected");
        assert_eq!(LinkState::Disconnected.to_string(), "disconnected");
        assert_eq!(LinkState::Connecting.to_string(), "connecting");
    }

    #[test]
    fn test_link_state_is_connected() {
        assert!(LinkState::Connected.is_connected());
        assert!(!LinkState::Connecting.is_connected());
        assert!(!LinkState::Disconnected.is_connected());
    }
}
