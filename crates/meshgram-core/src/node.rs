//! Mesh node identity and per-node state
//!
//! Mesh nodes are identified by a fixed-width 8-digit hex identifier,
//! conventionally written with a `!` prefix (`!a1b2c3d4`). [`NodeState`]
//! is the bridge's view of one node: last-seen time, last position,
//! telemetry snapshot, and an advisory staleness flag.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::position::Position;
use crate::telemetry::TelemetrySnapshot;

/// Unique identifier for a mesh node.
///
/// Stored as the canonical lowercase 8-digit hex form without the `!`
/// prefix. Parsing accepts both `a1b2c3d4` and `!a1b2c3d4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Parse a node ID, accepting an optional `!` prefix
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let hex = s.strip_prefix('!').unwrap_or(s);
        if hex.len() != 8 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidNodeId(s.to_string()));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Build a node ID from the numeric form used on the wire
    pub fn from_u32(raw: u32) -> Self {
        Self(format!("{raw:08x}"))
    }

    /// Numeric form of this ID
    pub fn as_u32(&self) -> u32 {
        // Always valid: constructor enforces 8 hex digits
        u32::from_str_radix(&self.0, 16).unwrap_or(0)
    }

    /// Bare hex form without the `!` prefix
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

/// Bridge-side state for one mesh node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    /// The node this state belongs to
    pub id: NodeId,
    /// Short display name from node info, if announced
    pub short_name: Option<String>,
    /// Long display name from node info, if announced
    pub long_name: Option<String>,
    /// Hardware model from node info, if announced
    pub hw_model: Option<String>,
    /// When any packet from this node was last seen
    pub last_seen: DateTime<Utc>,
    /// Last known position
    pub position: Option<Position>,
    /// When the position was last updated
    pub last_position_update: Option<DateTime<Utc>>,
    /// Latest telemetry snapshot
    pub telemetry: Option<TelemetrySnapshot>,
    /// Advisory staleness flag set by the heartbeat scanner
    pub stale: bool,
}

impl NodeState {
    /// Create state for a newly seen node
    pub fn new(id: NodeId, seen_at: DateTime<Utc>) -> Self {
        Self {
            id,
            short_name: None,
            long_name: None,
            hw_model: None,
            last_seen: seen_at,
            position: None,
            last_position_update: None,
            telemetry: None,
            stale: false,
        }
    }

    /// Record activity from this node.
    ///
    /// `last_seen` is monotone non-decreasing: an out-of-order timestamp
    /// never moves it backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
        self.stale = false;
    }

    /// Whether this node has been silent longer than `timeout`
    pub fn is_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_seen) > timeout
    }

    /// Best available display name: short name, else raw hex form
    pub fn display_name(&self) -> String {
        self.short_name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_and_without_prefix() {
        let a = NodeId::parse("!a1b2c3d4").unwrap();
        let b = NodeId::parse("a1b2c3d4").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "!a1b2c3d4");
    }

    #[test]
    fn test_parse_normalizes_case() {
        let id = NodeId::parse("!A1B2C3D4").unwrap();
        assert_eq!(id.as_hex(), "a1b2c3d4");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(NodeId::parse("a1b2c3").is_err());
        assert!(NodeId::parse("!a1b2c3d4e5").is_err());
        assert!(NodeId::parse("g1b2c3d4").is_err());
        assert!(NodeId::parse("").is_err());
    }

    #[test]
    fn test_u32_round_trip() {
        let id = NodeId::from_u32(0xDEADBEEF);
        assert_eq!(id.as_hex(), "deadbeef");
        assert_eq!(id.as_u32(), 0xDEADBEEF);
    }

    #[test]
    fn test_last_seen_is_monotone() {
        let id = NodeId::from_u32(1);
        let t0 = Utc::now();
        let mut state = NodeState::new(id, t0);

        let earlier = t0 - Duration::seconds(30);
        state.touch(earlier);
        assert_eq!(state.last_seen, t0);

        let later = t0 + Duration::seconds(30);
        state.touch(later);
        assert_eq!(state.last_seen, later);
    }

    #[test]
    fn test_staleness() {
        let id = NodeId::from_u32(2);
        let t0 = Utc::now();
        let state = NodeState::new(id, t0);

        let timeout = Duration::seconds(300);
        assert!(!state.is_stale(timeout, t0 + Duration::seconds(299)));
        assert!(state.is_stale(timeout, t0 + Duration::seconds(301)));
    }

    #[test]
    fn test_serde_as_string() {
        let id = NodeId::parse("!a1b2c3d4").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"!a1b2c3d4\"");

        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
