//! Outbound retry queue with backoff
//!
//! Every outbound send passes through this queue. Items wait for their
//! backoff timer, are attempted in first-enqueued order among the
//! eligible (priority breaks ties, so a command reply can pass queued
//! telemetry), and terminate by delivery, attempt exhaustion, or expiry.
//! The queue is the single writer of each item's attempt count and
//! state; enqueue is safe from any task.

use parking_lot::Mutex;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use meshgram_core::{ChatPost, MeshMessage};

use crate::config::RetryConfig;
use crate::ratelimit::Channel;

/// Delivery priority; higher values are attempted first among eligible items
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Routine traffic (telemetry relays)
    Low,
    /// Normal messages
    Normal,
    /// Command replies and operator notices
    High,
}

/// Rendered payload awaiting delivery
#[derive(Debug, Clone)]
pub enum OutboundPayload {
    /// Destined for the mesh radio
    Mesh(MeshMessage),
    /// Destined for the chat API
    Chat(ChatPost),
}

impl OutboundPayload {
    /// The rate-limit channel this payload consumes
    pub fn channel(&self) -> Channel {
        match self {
            OutboundPayload::Mesh(_) => Channel::Mesh,
            OutboundPayload::Chat(_) => Channel::Chat,
        }
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            OutboundPayload::Mesh(msg) => format!("mesh:{}", msg.payload.kind_name()),
            OutboundPayload::Chat(post) => {
                let preview: String = post.text.chars().take(32).collect();
                format!("chat:{preview}")
            }
        }
    }
}

/// One outbound item, owned by the queue from enqueue to resolution
#[derive(Debug, Clone)]
pub struct OutboundItem {
    /// Correlation id for logs
    pub id: Uuid,
    /// The payload to deliver
    pub payload: OutboundPayload,
    /// Delivery priority
    pub priority: Priority,
    /// Attempts made so far (incremented when the item is taken)
    pub attempts: u32,
    /// When the item entered the queue
    pub enqueued_at: Instant,
    /// Hard expiry deadline
    pub deadline: Instant,
    /// Earliest next attempt (backoff timer)
    next_attempt_at: Instant,
    /// Enqueue sequence number; preserves FIFO within a priority
    seq: u64,
}

/// Why an item terminated without delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Expiry deadline passed
    Expired,
    /// Attempt limit reached
    AttemptsExhausted,
}

/// Terminal report for an undelivered item
#[derive(Debug)]
pub struct DeliveryFailure {
    /// The failed item
    pub item: OutboundItem,
    /// Why it terminated
    pub kind: FailureKind,
}

#[derive(Debug, Default)]
struct Inner {
    items: Vec<OutboundItem>,
    next_seq: u64,
}

/// Buffer for outbound items with per-item exponential backoff
#[derive(Debug)]
pub struct RetryQueue {
    inner: Mutex<Inner>,
    config: RetryConfig,
}

impl RetryQueue {
    /// Create a queue with the given retry tuning
    pub fn new(config: RetryConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    /// Accept an item for delivery; returns immediately.
    pub fn enqueue(&self, payload: OutboundPayload, priority: Priority) -> Uuid {
        let now = Instant::now();
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        debug!(item = %id, seq, ?priority, what = %payload.describe(), "Enqueued outbound item");
        inner.items.push(OutboundItem {
            id,
            payload,
            priority,
            attempts: 0,
            enqueued_at: now,
            deadline: now + self.config.item_ttl,
            next_attempt_at: now,
            seq,
        });
        id
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Earliest instant at which any queued item needs attention, or
    /// `None` when the queue is empty. Items whose target side is down
    /// only wake for expiry; their backoff timers wait on reconnect.
    pub fn next_wake(&self, mesh_up: bool, chat_up: bool) -> Option<Instant> {
        let inner = self.inner.lock();
        inner
            .items
            .iter()
            .map(|item| {
                let side_up = match item.payload.channel() {
                    Channel::Mesh => mesh_up,
                    Channel::Chat => chat_up,
                };
                if side_up {
                    item.next_attempt_at.min(item.deadline)
                } else {
                    item.deadline
                }
            })
            .min()
    }

    /// Channel of the item the next [`take_eligible`](Self::take_eligible)
    /// call would return, without consuming an attempt. Lets the caller
    /// check the rate limiter before committing to an attempt.
    pub fn peek_eligible(&self, mesh_up: bool, chat_up: bool) -> Option<Channel> {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .items
            .iter()
            .filter(|item| {
                item.next_attempt_at <= now
                    && now < item.deadline
                    && match item.payload.channel() {
                        Channel::Mesh => mesh_up,
                        Channel::Chat => chat_up,
                    }
            })
            .max_by(|a, b| a.priority.cmp(&b.priority).then_with(|| b.seq.cmp(&a.seq)))
            .map(|item| item.payload.channel())
    }

    /// Remove and return everything still queued. Used at shutdown to
    /// report undelivered items; nothing is silently abandoned.
    pub fn drain_all(&self) -> Vec<OutboundItem> {
        std::mem::take(&mut self.inner.lock().items)
    }

    /// Remove and report every item whose deadline has passed.
    pub fn drain_expired(&self) -> Vec<DeliveryFailure> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();
        inner.items.retain(|item| {
            if now >= item.deadline {
                expired.push(item.clone());
                false
            } else {
                true
            }
        });
        drop(inner);
        expired
            .into_iter()
            .map(|item| DeliveryFailure {
                item,
                kind: FailureKind::Expired,
            })
            .collect()
    }

    /// Take the best eligible item for a delivery attempt.
    ///
    /// Eligible: backoff timer elapsed, deadline not passed, and the
    /// target side accepted by the filter. Selection is highest
    /// priority first, then first-enqueued. The returned item has its
    /// attempt count already incremented.
    pub fn take_eligible(&self, mesh_up: bool, chat_up: bool) -> Option<OutboundItem> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let best = inner
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                item.next_attempt_at <= now
                    && now < item.deadline
                    && match item.payload.channel() {
                        Channel::Mesh => mesh_up,
                        Channel::Chat => chat_up,
                    }
            })
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|(idx, _)| idx)?;

        let mut item = inner.items.swap_remove(best);
        item.attempts += 1;
        trace!(item = %item.id, attempts = item.attempts, "Taking item for delivery attempt");
        Some(item)
    }

    /// Return a failed item to the queue with backoff, or report it as
    /// terminally failed when the attempt limit is reached.
    pub fn record_failure(&self, mut item: OutboundItem) -> Option<DeliveryFailure> {
        if item.attempts >= self.config.max_attempts {
            debug!(item = %item.id, attempts = item.attempts, "Attempt limit reached");
            return Some(DeliveryFailure {
                item,
                kind: FailureKind::AttemptsExhausted,
            });
        }

        let delay = self.backoff_delay(item.attempts);
        item.next_attempt_at = Instant::now() + delay;
        debug!(
            item = %item.id,
            attempts = item.attempts,
            delay_ms = delay.as_millis() as u64,
            "Requeued with backoff"
        );
        self.inner.lock().items.push(item);
        None
    }

    /// Backoff after `attempts` failed attempts: base doubling up to
    /// the cap, plus uniform jitter of up to half the delay.
    fn backoff_delay(&self, attempts: u32) -> Duration {
        let base = self.config.base_delay;
        let exp = attempts.saturating_sub(1).min(16);
        let delay = base.saturating_mul(1u32 << exp).min(self.config.max_delay);
        let jitter_ms = delay.as_millis() as u64 / 2;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgram_core::{MeshPayload, NodeId};
    use tokio::time::advance;

    fn chat_item(text: &str) -> OutboundPayload {
        OutboundPayload::Chat(ChatPost::text(text))
    }

    fn mesh_item(text: &str) -> OutboundPayload {
        OutboundPayload::Mesh(MeshMessage::outgoing(
            NodeId::from_u32(1),
            None,
            MeshPayload::Text(text.to_string()),
        ))
    }

    fn queue() -> RetryQueue {
        RetryQueue::new(RetryConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
            item_ttl: Duration::from_secs(300),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_among_eligible() {
        let q = queue();
        q.enqueue(chat_item("first"), Priority::Normal);
        q.enqueue(chat_item("second"), Priority::Normal);

        let a = q.take_eligible(true, true).unwrap();
        let b = q.take_eligible(true, true).unwrap();
        assert!(matches!(&a.payload, OutboundPayload::Chat(p) if p.text == "first"));
        assert!(matches!(&b.payload, OutboundPayload::Chat(p) if p.text == "second"));
        assert!(q.take_eligible(true, true).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_breaks_fifo() {
        let q = queue();
        q.enqueue(chat_item("routine"), Priority::Low);
        q.enqueue(chat_item("reply"), Priority::High);

        let first = q.take_eligible(true, true).unwrap();
        assert!(matches!(&first.payload, OutboundPayload::Chat(p) if p.text == "reply"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_count_increments() {
        let q = queue();
        q.enqueue(chat_item("x"), Priority::Normal);

        let item = q.take_eligible(true, true).unwrap();
        assert_eq!(item.attempts, 1);

        assert!(q.record_failure(item).is_none());
        advance(Duration::from_secs(2)).await;
        let item = q.take_eligible(true, true).unwrap();
        assert_eq!(item.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_defers_eligibility() {
        let q = queue();
        q.enqueue(chat_item("x"), Priority::Normal);

        let item = q.take_eligible(true, true).unwrap();
        q.record_failure(item);

        // Backoff after one attempt is 1s..1.5s; not eligible yet
        assert!(q.take_eligible(true, true).is_none());
        advance(Duration::from_millis(1600)).await;
        assert!(q.take_eligible(true, true).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted() {
        let q = queue();
        q.enqueue(chat_item("doomed"), Priority::Normal);

        for round in 1..=3 {
            advance(Duration::from_secs(30)).await;
            let item = q.take_eligible(true, true).unwrap();
            assert_eq!(item.attempts, round);
            match q.record_failure(item) {
                None => assert!(round < 3),
                Some(failure) => {
                    assert_eq!(round, 3);
                    assert_eq!(failure.kind, FailureKind::AttemptsExhausted);
                    assert_eq!(failure.item.attempts, 3);
                }
            }
        }
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let q = RetryQueue::new(RetryConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
            item_ttl: Duration::from_secs(10),
        });
        q.enqueue(chat_item("stale"), Priority::Normal);

        advance(Duration::from_secs(11)).await;
        assert!(q.take_eligible(true, true).is_none());
        let failures = q.drain_expired();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Expired);
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_down_side_accumulates() {
        let q = queue();
        q.enqueue(mesh_item("to mesh"), Priority::Normal);
        q.enqueue(chat_item("to chat"), Priority::Normal);

        // Mesh side down: only the chat item is offered
        let item = q.take_eligible(false, true).unwrap();
        assert!(matches!(item.payload, OutboundPayload::Chat(_)));
        assert!(q.take_eligible(false, true).is_none());
        assert_eq!(q.len(), 1);

        // Mesh back up
        let item = q.take_eligible(true, true).unwrap();
        assert!(matches!(item.payload, OutboundPayload::Mesh(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_wake_tracks_earliest() {
        let q = queue();
        assert!(q.next_wake(true, true).is_none());

        q.enqueue(chat_item("x"), Priority::Normal);
        let wake = q.next_wake(true, true).unwrap();
        assert!(wake <= Instant::now());

        let item = q.take_eligible(true, true).unwrap();
        q.record_failure(item);
        let wake = q.next_wake(true, true).unwrap();
        assert!(wake > Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_wake_down_side_waits_for_expiry() {
        let q = queue();
        q.enqueue(chat_item("x"), Priority::Normal);

        // Chat side down: the item only needs attention at its deadline
        let wake = q.next_wake(true, false).unwrap();
        assert!(wake > Instant::now() + Duration::from_secs(299));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peek_matches_take() {
        let q = queue();
        q.enqueue(mesh_item("m"), Priority::Low);
        q.enqueue(chat_item("c"), Priority::High);

        assert_eq!(q.peek_eligible(true, true), Some(Channel::Chat));
        let item = q.take_eligible(true, true).unwrap();
        assert_eq!(item.payload.channel(), Channel::Chat);
        assert_eq!(q.peek_eligible(true, true), Some(Channel::Mesh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_all() {
        let q = queue();
        q.enqueue(chat_item("a"), Priority::Normal);
        q.enqueue(mesh_item("b"), Priority::Normal);

        let drained = q.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(q.is_empty());
    }
}
