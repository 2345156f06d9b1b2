//! Node registry: the bridge's view of the mesh population
//!
//! Owns the NodeState map. Mutation happens only on the engine task
//! (single-writer discipline); the command router reads snapshots for
//! `/status` and `/node`. Entries are never evicted: a silent node is
//! marked stale by the heartbeat scanner, which is informational only.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use meshgram_core::{MeshMessage, MeshPayload, NodeId, NodeState, TelemetrySnapshot};

use crate::translator::format_timestamp;

/// Registry of every node the bridge has seen or was configured with
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, NodeState>,
    heartbeat_timeout: ChronoDuration,
}

impl NodeRegistry {
    /// Create a registry pre-seeded with the configured local nodes so
    /// `/status` can list them before their first packet.
    pub fn new(local_nodes: &[NodeId], heartbeat_timeout: Duration, now: DateTime<Utc>) -> Self {
        let mut nodes = BTreeMap::new();
        for id in local_nodes {
            nodes.insert(id.clone(), NodeState::new(id.clone(), now));
        }
        Self {
            nodes,
            heartbeat_timeout: ChronoDuration::from_std(heartbeat_timeout)
                .unwrap_or_else(|_| ChronoDuration::seconds(300)),
        }
    }

    /// Record an inbound mesh message against its source node.
    ///
    /// Returns the node-info names when the payload announced them, so
    /// the caller can refresh its alias table.
    pub fn observe(&mut self, msg: &MeshMessage) -> Option<(NodeId, String)> {
        let state = self
            .nodes
            .entry(msg.source.clone())
            .or_insert_with(|| NodeState::new(msg.source.clone(), msg.timestamp));
        state.touch(msg.timestamp);

        match &msg.payload {
            MeshPayload::Position(pos) => {
                state.position = Some(pos.rounded());
                state.last_position_update = Some(msg.timestamp);
                None
            }
            MeshPayload::Telemetry(t) => {
                state.telemetry = Some(t.clone());
                None
            }
            MeshPayload::NodeInfo {
                short_name,
                long_name,
                hw_model,
            } => {
                debug!(node = %msg.source, short_name, "Node announced itself");
                state.short_name = Some(short_name.clone());
                state.long_name = Some(long_name.clone());
                state.hw_model = Some(hw_model.clone());
                Some((msg.source.clone(), short_name.clone()))
            }
            _ => None,
        }
    }

    /// Look up one node
    pub fn get(&self, id: &NodeId) -> Option<&NodeState> {
        self.nodes.get(id)
    }

    /// Whether the registry knows this node
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of known nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Mark nodes whose last-seen exceeds the heartbeat timeout.
    ///
    /// Advisory only, never an eviction or a connection action. Returns
    /// the nodes that newly became stale in this scan.
    pub fn scan_stale(&mut self, now: DateTime<Utc>) -> Vec<NodeId> {
        let mut newly_stale = Vec::new();
        for (id, state) in self.nodes.iter_mut() {
            let stale = state.is_stale(self.heartbeat_timeout, now);
            if stale && !state.stale {
                info!(node = %id, last_seen = %format_timestamp(state.last_seen), "Node went stale");
                newly_stale.push(id.clone());
            }
            state.stale = stale;
        }
        newly_stale
    }

    /// One line per node for the `/status` reply
    pub fn status_lines(&self, now: DateTime<Utc>) -> Vec<String> {
        self.nodes
            .values()
            .map(|state| {
                let marker = if state.is_stale(self.heartbeat_timeout, now) {
                    " [stale]"
                } else {
                    ""
                };
                format!(
                    "🔹 {}: last seen {}{marker}",
                    state.display_name(),
                    format_timestamp(state.last_seen)
                )
            })
            .collect()
    }

    /// Full report for the `/node` reply, or `None` for unknown nodes
    pub fn node_report(&self, id: &NodeId, now: DateTime<Utc>) -> Option<String> {
        let state = self.nodes.get(id)?;
        let mut sections = Vec::new();

        let mut header = format!("🔷 Node {}", state.display_name());
        if state.is_stale(self.heartbeat_timeout, now) {
            header.push_str(" [stale]");
        }
        sections.push(header);

        if let Some(long_name) = &state.long_name {
            sections.push(format!("📝 Name: {long_name}"));
        }
        if let Some(hw) = &state.hw_model {
            sections.push(format!("🖥️ Hardware: {hw}"));
        }
        sections.push(format!(
            "🕒 Last seen: {}",
            format_timestamp(state.last_seen)
        ));

        match &state.telemetry {
            Some(t) => {
                sections.push(format!("🔋 Battery: {}", t.battery_text()));
                sections.push(format!(
                    "📡 Air Utilization TX: {}",
                    TelemetrySnapshot::percent_text(t.air_util_tx)
                ));
                sections.push(format!(
                    "📊 Channel Utilization: {}",
                    TelemetrySnapshot::percent_text(t.channel_utilization)
                ));
            }
            None => sections.push(format!("📊 No telemetry available for node {id}")),
        }

        match &state.position {
            Some(pos) => {
                sections.push(format!(
                    "📍 Position: lat={:.6}, lon={:.6}",
                    pos.latitude, pos.longitude
                ));
                if let Some(at) = state.last_position_update {
                    sections.push(format!("🌎 Position updated: {}", format_timestamp(at)));
                }
            }
            None => sections.push(format!("📍 No position available for node {id}")),
        }

        Some(sections.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgram_core::Position;

    fn node(raw: u32) -> NodeId {
        NodeId::from_u32(raw)
    }

    fn msg(source: NodeId, payload: MeshPayload, at: DateTime<Utc>) -> MeshMessage {
        MeshMessage {
            source,
            destination: None,
            payload,
            packet_id: 1,
            timestamp: at,
            hop_count: 0,
        }
    }

    #[test]
    fn test_preseeded_local_nodes() {
        let now = Utc::now();
        let registry = NodeRegistry::new(
            &[node(1), node(2)],
            Duration::from_secs(300),
            now,
        );
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&node(1)));
    }

    #[test]
    fn test_observe_creates_and_updates() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new(&[], Duration::from_secs(300), now);

        registry.observe(&msg(node(3), MeshPayload::Text("hi".to_string()), now));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&node(3)).unwrap().last_seen, now);

        let pos = Position::new(10.0, 20.0, None).unwrap();
        let later = now + ChronoDuration::seconds(5);
        registry.observe(&msg(node(3), MeshPayload::Position(pos), later));
        let state = registry.get(&node(3)).unwrap();
        assert_eq!(state.last_seen, later);
        assert!(state.position.is_some());
    }

    #[test]
    fn test_observe_nodeinfo_returns_alias() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new(&[], Duration::from_secs(300), now);

        let alias = registry.observe(&msg(
            node(4),
            MeshPayload::NodeInfo {
                short_name: "RLY1".to_string(),
                long_name: "Relay One".to_string(),
                hw_model: "HELTEC".to_string(),
            },
            now,
        ));
        assert_eq!(alias, Some((node(4), "RLY1".to_string())));
        assert_eq!(
            registry.get(&node(4)).unwrap().long_name.as_deref(),
            Some("Relay One")
        );
    }

    #[test]
    fn test_scan_stale_reports_transitions_once() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new(&[node(5)], Duration::from_secs(300), now);

        let later = now + ChronoDuration::seconds(301);
        assert_eq!(registry.scan_stale(later), vec![node(5)]);
        // Second scan: still stale, but not newly so
        assert!(registry.scan_stale(later).is_empty());

        // Activity clears the flag
        registry.observe(&msg(node(5), MeshPayload::Text("back".to_string()), later));
        assert!(!registry.get(&node(5)).unwrap().stale);
    }

    #[test]
    fn test_status_lines_mark_stale() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new(&[node(6), node(7)], Duration::from_secs(300), now);

        let later = now + ChronoDuration::seconds(600);
        registry.scan_stale(later);
        let lines = registry.status_lines(later);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.contains("[stale]")));
    }

    #[test]
    fn test_node_report_unknown() {
        let registry = NodeRegistry::new(&[], Duration::from_secs(300), Utc::now());
        assert!(registry.node_report(&node(9), Utc::now()).is_none());
    }

    #[test]
    fn test_node_report_contents() {
        let now = Utc::now();
        let mut registry = NodeRegistry::new(&[], Duration::from_secs(300), now);
        registry.observe(&msg(
            node(8),
            MeshPayload::Telemetry(TelemetrySnapshot {
                battery_level: Some(101),
                voltage: Some(4.1),
                channel_utilization: Some(5.5),
                air_util_tx: Some(1.25),
                uptime_seconds: Some(3600),
            }),
            now,
        ));

        let report = registry.node_report(&node(8), now).unwrap();
        assert!(report.contains("Battery: PWR"));
        assert!(report.contains("Air Utilization TX: 1.25%"));
        assert!(report.contains("No position available"));
    }
}
