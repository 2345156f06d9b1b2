//! Deduplication cache for inbound mesh packets
//!
//! Mesh networks flood packets; the same packet can reach the bridge's
//! radio more than once via different paths. The cache tracks recently
//! seen `(source, packet_id)` pairs with LRU eviction and TTL expiry
//! and blocks repeats before they reach translation.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use meshgram_core::NodeId;

use crate::config::EngineConfig;

/// Key identifying one mesh packet
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct PacketKey {
    /// Source node
    pub source: NodeId,
    /// Packet identifier from the mesh header
    pub packet_id: u32,
}

impl PacketKey {
    /// Key for a source/packet pair
    pub fn new(source: NodeId, packet_id: u32) -> Self {
        Self { source, packet_id }
    }
}

impl std::fmt::Display for PacketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:08x}", self.source, self.packet_id)
    }
}

/// LRU-based deduplication cache with TTL expiration
#[derive(Debug)]
pub struct DeduplicationCache {
    cache: LruCache<PacketKey, Instant>,
    ttl: Duration,
}

impl DeduplicationCache {
    /// Create from engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_capacity_and_ttl(config.dedup_cache_size, config.dedup_ttl)
    }

    /// Create with custom capacity and TTL
    pub fn with_capacity_and_ttl(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
            ttl,
        }
    }

    /// Check whether a packet was already seen; records it if new.
    ///
    /// An entry older than the TTL is treated as new again (mesh packet
    /// ids wrap and may legitimately recur).
    pub fn is_duplicate(&mut self, key: &PacketKey) -> bool {
        let now = Instant::now();

        if let Some(first_seen) = self.cache.get_mut(key) {
            if now.duration_since(*first_seen) > self.ttl {
                trace!(key = %key, "Cache entry expired, treating as new");
                *first_seen = now;
                return false;
            }
            debug!(key = %key, "Duplicate mesh packet");
            return true;
        }

        self.cache.put(key.clone(), now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn key(raw: u32, packet_id: u32) -> PacketKey {
        PacketKey::new(NodeId::from_u32(raw), packet_id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sighting_passes() {
        let mut cache = DeduplicationCache::with_capacity_and_ttl(8, Duration::from_secs(300));
        assert!(!cache.is_duplicate(&key(1, 100)));
        assert!(cache.is_duplicate(&key(1, 100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_packets_pass() {
        let mut cache = DeduplicationCache::with_capacity_and_ttl(8, Duration::from_secs(300));
        assert!(!cache.is_duplicate(&key(1, 100)));
        assert!(!cache.is_duplicate(&key(1, 101)));
        assert!(!cache.is_duplicate(&key(2, 100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_resets() {
        let mut cache = DeduplicationCache::with_capacity_and_ttl(8, Duration::from_secs(60));
        assert!(!cache.is_duplicate(&key(1, 100)));

        advance(Duration::from_secs(61)).await;
        assert!(!cache.is_duplicate(&key(1, 100)));
        assert!(cache.is_duplicate(&key(1, 100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction() {
        let mut cache = DeduplicationCache::with_capacity_and_ttl(2, Duration::from_secs(300));
        assert!(!cache.is_duplicate(&key(1, 1)));
        assert!(!cache.is_duplicate(&key(1, 2)));
        assert!(!cache.is_duplicate(&key(1, 3)));

        // Oldest entry evicted, so the packet reads as new again
        assert!(!cache.is_duplicate(&key(1, 1)));
    }
}
