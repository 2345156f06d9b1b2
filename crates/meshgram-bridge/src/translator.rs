//! Message translation between mesh and chat formats
//!
//! Pure mapping logic, no I/O. Translation is total by contract: every
//! mesh payload kind renders to non-empty chat text, with unmapped
//! kinds degrading to a placeholder naming the kind rather than being
//! dropped or raised as errors.
//!
//! # Format conventions
//!
//! | Direction | Shape |
//! |-----------|-------|
//! | mesh text → chat | `📡 {sender} → {recipient}` header, `💬 {text}` body |
//! | chat text → mesh | `[TG:{sender}] {text}`, sender clipped to 10 chars |
//! | position → chat | location attachment + 6-decimal coordinates |
//! | chat location → mesh | Position broadcast, rounded to 6 decimals |

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use meshgram_core::{
    ChatPost, MeshMessage, MeshPayload, NodeId, Position, TelemetrySnapshot,
};

use crate::config::MESH_MAX_TEXT;

/// Chat sender names are clipped to this many characters in mesh text
const SENDER_CLIP: usize = 10;

/// Bidirectional translator between mesh packets and chat messages
#[derive(Debug, Default)]
pub struct Translator {
    /// Display names learned from node-info announcements
    aliases: HashMap<NodeId, String>,
}

impl Translator {
    /// Create a translator with an empty alias table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a display name for a node.
    ///
    /// Called by the engine when a node-info announcement arrives; the
    /// translation functions themselves stay side-effect free.
    pub fn set_alias(&mut self, id: NodeId, name: impl Into<String>) {
        self.aliases.insert(id, name.into());
    }

    /// Display name for a node: learned alias, else raw hex form
    pub fn display_name(&self, id: &NodeId) -> String {
        match self.aliases.get(id) {
            Some(name) => format!("{name} ({id})"),
            None => id.to_string(),
        }
    }

    /// Render a mesh message as an outbound chat post.
    ///
    /// Total: never fails, never returns empty text.
    pub fn mesh_to_chat(&self, msg: &MeshMessage) -> ChatPost {
        let sender = self.display_name(&msg.source);
        let recipient = match &msg.destination {
            Some(dest) => self.display_name(dest),
            None => "broadcast".to_string(),
        };

        match &msg.payload {
            MeshPayload::Text(text) => {
                ChatPost::text(format!("📡 {sender} → {recipient}\n💬 {text}"))
            }
            MeshPayload::Position(pos) => {
                let pos = pos.rounded();
                let mut text = format!(
                    "📍 {sender} position: lat={:.6}, lon={:.6}",
                    pos.latitude, pos.longitude
                );
                if let Some(alt) = pos.altitude {
                    text.push_str(&format!(", alt={alt:.1}m"));
                }
                ChatPost::text(text).with_location(pos)
            }
            MeshPayload::Telemetry(t) => ChatPost::text(self.telemetry_line(&sender, t)).silent(),
            MeshPayload::NodeInfo {
                short_name,
                long_name,
                hw_model,
            } => ChatPost::text(format!(
                "ℹ️ {sender} is {long_name} ({short_name}), hardware {hw_model}"
            ))
            .silent(),
            MeshPayload::Routing { route } => {
                if route.is_empty() {
                    ChatPost::text(format!("🔍 Route from {sender}: no route found"))
                } else {
                    let hops = route
                        .iter()
                        .map(NodeId::to_string)
                        .collect::<Vec<_>>()
                        .join(" → ");
                    ChatPost::text(format!("🔍 Route from {sender}: {hops}"))
                }
            }
            MeshPayload::Neighbors { neighbors } => {
                if neighbors.is_empty() {
                    ChatPost::text(format!("👥 {sender} reports no neighbors")).silent()
                } else {
                    let list = neighbors
                        .iter()
                        .map(|n| self.display_name(n))
                        .collect::<Vec<_>>()
                        .join(", ");
                    ChatPost::text(format!("👥 {sender} neighbors: {list}")).silent()
                }
            }
            MeshPayload::Unknown { port } => ChatPost::text(format!(
                "📡 {sender} → {recipient}\n[unsupported mesh payload: port {port}]"
            ))
            .silent(),
        }
    }

    /// Render a chat text message as a mesh text packet.
    ///
    /// An explicit leading `!xxxxxxxx` token addresses that node and is
    /// stripped from the text; otherwise the configured default node
    /// (or broadcast) receives it. Text is clipped to the radio's limit.
    pub fn chat_text_to_mesh(
        &self,
        source: NodeId,
        sender: &str,
        text: &str,
        default_destination: Option<NodeId>,
    ) -> MeshMessage {
        let (destination, body) = match explicit_target(text) {
            Some((target, rest)) => (Some(target), rest),
            None => (default_destination, text),
        };

        let clipped_sender: String = sender.chars().take(SENDER_CLIP).collect();
        let rendered = clip_text(&format!("[TG:{clipped_sender}] {body}"), MESH_MAX_TEXT);
        MeshMessage::outgoing(source, destination, MeshPayload::Text(rendered))
    }

    /// Render a shared chat location as a mesh position broadcast.
    pub fn chat_location_to_mesh(&self, source: NodeId, position: Position) -> MeshMessage {
        MeshMessage::outgoing(source, None, MeshPayload::Position(position.rounded()))
    }

    /// Confirmation text posted back to chat after a location relay.
    pub fn location_confirmation(&self, position: &Position) -> String {
        let pos = position.rounded();
        let alt = pos.altitude.unwrap_or(0.0);
        format!(
            "📍 Location sent to mesh network: lat={:.6}, lon={:.6}, alt={alt:.1}m",
            pos.latitude, pos.longitude
        )
    }

    /// One status line for a telemetry snapshot.
    fn telemetry_line(&self, sender: &str, t: &TelemetrySnapshot) -> String {
        let mut parts = vec![format!("🔋 {}", t.battery_text())];
        if let Some(v) = t.voltage {
            parts.push(format!("⚡ {v:.2}V"));
        }
        parts.push(format!(
            "📡 air {}",
            TelemetrySnapshot::percent_text(t.air_util_tx)
        ));
        parts.push(format!(
            "📊 ch {}",
            TelemetrySnapshot::percent_text(t.channel_utilization)
        ));
        if let Some(up) = t.uptime_seconds {
            parts.push(format!("⏱️ {}", format_uptime(up)));
        }
        format!("📊 {sender} telemetry: {}", parts.join(", "))
    }
}

/// Parse a leading explicit node target from chat text.
fn explicit_target(text: &str) -> Option<(NodeId, &str)> {
    let text = text.trim_start();
    let token = text.split_whitespace().next()?;
    if !token.starts_with('!') {
        return None;
    }
    let target = NodeId::parse(token).ok()?;
    let rest = text[token.len()..].trim_start();
    Some((target, rest))
}

/// Clip text to `max` bytes on a char boundary.
fn clip_text(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Uptime rendered as `{d}d {hh}h {mm}m`
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    format!("{days}d {hours:02}h {minutes:02}m")
}

/// Timestamp rendered in the chat platform's expected format (UTC)
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
