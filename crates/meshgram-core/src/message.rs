//! Message types crossing the bridge
//!
//! [`MeshMessage`] is the bridge's view of one decoded mesh packet,
//! created by the mesh adapter and read-only downstream. [`ChatMessage`]
//! is one inbound chat-platform message; [`ChatPost`] is the rendered
//! outbound form the bridge hands back to the chat adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::NodeId;
use crate::position::Position;
use crate::telemetry::TelemetrySnapshot;

/// A decoded packet received from (or destined for) the mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMessage {
    /// Source node
    pub source: NodeId,
    /// Destination node, `None` for broadcast
    pub destination: Option<NodeId>,
    /// Decoded payload
    pub payload: MeshPayload,
    /// Packet identifier from the mesh header, used for deduplication
    pub packet_id: u32,
    /// When the packet was received (or created, for outbound)
    pub timestamp: DateTime<Utc>,
    /// Hops taken so far
    pub hop_count: u8,
}

impl MeshMessage {
    /// Create an outbound message from this bridge's node
    pub fn outgoing(source: NodeId, destination: Option<NodeId>, payload: MeshPayload) -> Self {
        Self {
            source,
            destination,
            payload,
            packet_id: 0,
            timestamp: Utc::now(),
            hop_count: 0,
        }
    }

    /// Whether this message is a broadcast
    pub fn is_broadcast(&self) -> bool {
        self.destination.is_none()
    }
}

/// Payload kinds carried by mesh packets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeshPayload {
    /// UTF-8 text message
    Text(String),
    /// Position report
    Position(Position),
    /// Device telemetry
    Telemetry(TelemetrySnapshot),
    /// Node identity announcement
    NodeInfo {
        /// Short display name
        short_name: String,
        /// Long display name
        long_name: String,
        /// Hardware model
        hw_model: String,
    },
    /// Route discovered by a traceroute-style query
    Routing {
        /// Nodes along the route, in order
        route: Vec<NodeId>,
    },
    /// Neighbor table announcement
    Neighbors {
        /// Directly reachable nodes
        neighbors: Vec<NodeId>,
    },
    /// Payload on a port this bridge does not decode
    Unknown {
        /// The mesh port number
        port: u32,
    },
}

impl MeshPayload {
    /// Stable name for this payload kind, used in logs and placeholders
    pub fn kind_name(&self) -> &'static str {
        match self {
            MeshPayload::Text(_) => "text",
            MeshPayload::Position(_) => "position",
            MeshPayload::Telemetry(_) => "telemetry",
            MeshPayload::NodeInfo { .. } => "nodeinfo",
            MeshPayload::Routing { .. } => "routing",
            MeshPayload::Neighbors { .. } => "neighbors",
            MeshPayload::Unknown { .. } => "unknown",
        }
    }
}

/// One inbound chat-platform message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender display name
    pub sender: String,
    /// Platform user id of the sender
    pub user_id: i64,
    /// Message text (commands included, `/`-prefixed)
    pub text: String,
    /// Attached location, if any
    pub location: Option<Position>,
    /// When the platform timestamped the message
    pub timestamp: DateTime<Utc>,
    /// Platform message id, usable for reply threading
    pub message_id: i64,
}

/// One rendered outbound chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPost {
    /// Message text
    pub text: String,
    /// Location attachment, if any
    pub location: Option<Position>,
    /// Deliver without a notification sound
    pub silent: bool,
    /// Message id to reply to, if threading
    pub reply_to: Option<i64>,
}

impl ChatPost {
    /// Plain text post
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
            silent: false,
            reply_to: None,
        }
    }

    /// Attach a location
    pub fn with_location(mut self, location: Position) -> Self {
        self.location = Some(location);
        self
    }

    /// Deliver silently
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Thread under an existing message
    pub fn in_reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_detection() {
        let msg = MeshMessage::outgoing(
            NodeId::from_u32(0x11223344),
            None,
            MeshPayload::Text("hi".to_string()),
        );
        assert!(msg.is_broadcast());

        let msg = MeshMessage::outgoing(
            NodeId::from_u32(0x11223344),
            Some(NodeId::from_u32(0x55667788)),
            MeshPayload::Text("hi".to_string()),
        );
        assert!(!msg.is_broadcast());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(MeshPayload::Text("x".into()).kind_name(), "text");
        assert_eq!(MeshPayload::Unknown { port: 73 }.kind_name(), "unknown");
    }

    #[test]
    fn test_chat_post_builder() {
        let post = ChatPost::text("pong").silent().in_reply_to(42);
        assert_eq!(post.text, "pong");
        assert!(post.silent);
        assert_eq!(post.reply_to, Some(42));
        assert!(post.location.is_none());
    }
}
