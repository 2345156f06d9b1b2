//! BridgeEngine - the bridge's supervising event loop
//!
//! Owns both adapters and wires the full pipeline:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        BridgeEngine                            │
//! ├────────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │  ┌────────────┐   ┌──────────────┐   ┌─────────────┐           │
//! │  │ MeshAdapter│◄─►│ Translator   │◄─►│ ChatAdapter │           │
//! │  │            │   │ CommandRouter│   │             │           │
//! │  └────────────┘   │ NodeRegistry │   └─────────────┘           │
//! │                   │ DedupCache   │                             │
//! │   outbound path:  └──────────────┘                             │
//! │   RetryQueue ── RateLimiter ── adapter.send()                  │
//! │                                                                │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One `select!` loop serves: inbound events from each connected
//! adapter, per-adapter reconnect timers, the retry queue's wake timer,
//! the heartbeat scanner, and control commands. Transport errors never
//! escape the engine; they become DISCONNECTED transitions with
//! independent exponential backoff while the other side keeps running.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use meshgram_core::{ChatPost, MeshPayload, NodeId};

use crate::adapter::{ChatAdapter, ChatEvent, LinkState, MeshAdapter, MeshEvent};
use crate::config::BridgeConfig;
use crate::dedup::{DeduplicationCache, PacketKey};
use crate::error::{BridgeError, Result};
use crate::nodes::NodeRegistry;
use crate::ratelimit::{Channel, RateLimiter};
use crate::retry::{
    DeliveryFailure, FailureKind, OutboundItem, OutboundPayload, Priority, RetryQueue,
};
use crate::router::{is_command, AuthorizationSet, CommandRouter, Disposition, RouterContext};
use crate::translator::Translator;

/// Commands that can be sent to a running engine
#[derive(Debug)]
pub enum BridgeCommand {
    /// Get engine statistics
    GetStats(oneshot::Sender<BridgeStats>),
    /// Shut the engine down gracefully
    Shutdown,
}

/// Engine statistics
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    /// Mesh messages translated toward chat
    pub mesh_to_chat: u64,
    /// Chat messages translated toward the mesh
    pub chat_to_mesh: u64,
    /// Outbound items delivered
    pub delivered: u64,
    /// Inbound mesh packets blocked by deduplication
    pub duplicates_blocked: u64,
    /// Adapter transport errors observed
    pub transport_errors: u64,
    /// Items that exhausted their attempt limit
    pub delivery_failures: u64,
    /// Items that passed their expiry deadline
    pub expired_items: u64,
    /// Commands that emitted a mesh message
    pub commands_dispatched: u64,
    /// Commands rejected (denied, unknown target, malformed)
    pub commands_rejected: u64,
    /// Read-only commands answered
    pub commands_handled: u64,
    /// Successful mesh reconnections
    pub mesh_reconnects: u64,
    /// Successful chat reconnections
    pub chat_reconnects: u64,
}

/// Handle for controlling a running [`BridgeEngine`]
#[derive(Clone, Debug)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    /// Get engine statistics
    pub async fn stats(&self) -> Result<BridgeStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::GetStats(tx))
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Shut the engine down gracefully
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Shutdown)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }
}

/// Exponential backoff schedule for one adapter's reconnects
#[derive(Debug)]
struct ReconnectBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl ReconnectBackoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            initial,
            max,
        }
    }

    /// Delay to use now; doubles for next time, up to the cap
    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Which adapter a link operation concerns; used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Mesh,
    Chat,
}

impl Side {
    fn name(&self) -> &'static str {
        match self {
            Side::Mesh => "mesh",
            Side::Chat => "chat",
        }
    }
}

/// The bridge engine: owns both adapters and supervises the pipeline
pub struct BridgeEngine<M: MeshAdapter, C: ChatAdapter> {
    mesh: M,
    chat: C,
    config: BridgeConfig,
    translator: Translator,
    router: CommandRouter,
    registry: NodeRegistry,
    retry: RetryQueue,
    limiter: RateLimiter,
    dedup: DeduplicationCache,
    command_rx: mpsc::Receiver<BridgeCommand>,
    stats: BridgeStats,
    mesh_link: LinkState,
    chat_link: LinkState,
    mesh_backoff: ReconnectBackoff,
    chat_backoff: ReconnectBackoff,
    mesh_retry_at: Option<Instant>,
    chat_retry_at: Option<Instant>,
    mesh_ever_connected: bool,
    chat_ever_connected: bool,
    /// Earliest next flush when the rate limiter gated delivery
    flush_not_before: Option<Instant>,
    started_at: DateTime<Utc>,
    local_node: NodeId,
    running: bool,
}

impl<M: MeshAdapter, C: ChatAdapter> std::fmt::Debug for BridgeEngine<M, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeEngine")
            .field("running", &self.running)
            .field("mesh_link", &self.mesh_link)
            .field("chat_link", &self.chat_link)
            .finish_non_exhaustive()
    }
}

impl<M: MeshAdapter + 'static, C: ChatAdapter + 'static> BridgeEngine<M, C> {
    /// Create an engine from injected adapters and configuration.
    ///
    /// Configuration is validated here, before any adapter connects;
    /// this is the only fatal error path in the bridge.
    pub fn new(mesh: M, chat: C, config: BridgeConfig) -> Result<(Self, BridgeHandle)> {
        config.validate()?;

        let router = CommandRouter::new(AuthorizationSet::new(&config.chat.authorized_users));
        let started_at = Utc::now();
        let registry = NodeRegistry::new(
            &config.mesh.local_nodes,
            config.mesh.heartbeat_timeout,
            started_at,
        );
        let retry = RetryQueue::new(config.retry.clone());
        let limiter = RateLimiter::new(&config.rate);
        let dedup = DeduplicationCache::from_config(&config.engine);
        // The device stamps the real source id on transmit; this is the
        // engine's best local guess for rendering and dispatch.
        let local_node = config
            .mesh
            .local_nodes
            .first()
            .cloned()
            .or_else(|| config.mesh.default_node_id.clone())
            .unwrap_or_else(|| NodeId::from_u32(0));

        let (command_tx, command_rx) = mpsc::channel(64);
        let handle = BridgeHandle { command_tx };

        let engine = Self {
            mesh,
            chat,
            translator: Translator::new(),
            router,
            registry,
            retry,
            limiter,
            dedup,
            command_rx,
            stats: BridgeStats::default(),
            mesh_link: LinkState::Disconnected,
            chat_link: LinkState::Disconnected,
            mesh_backoff: ReconnectBackoff::new(
                config.reconnect.initial_delay,
                config.reconnect.max_delay,
            ),
            chat_backoff: ReconnectBackoff::new(
                config.reconnect.initial_delay,
                config.reconnect.max_delay,
            ),
            mesh_retry_at: None,
            chat_retry_at: None,
            mesh_ever_connected: false,
            chat_ever_connected: false,
            flush_not_before: None,
            started_at,
            local_node,
            config,
            running: false,
        };

        Ok((engine, handle))
    }

    /// Run the engine until shutdown.
    pub async fn run(mut self) -> Result<()> {
        if self.running {
            return Err(BridgeError::AlreadyRunning);
        }
        self.running = true;
        info!("Starting bridge engine");

        self.connect_side(Side::Mesh).await;
        self.connect_side(Side::Chat).await;

        let mut heartbeat = tokio::time::interval(self.config.engine.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; consume it
        heartbeat.tick().await;

        loop {
            let mesh_connected = self.mesh_link.is_connected();
            let chat_connected = self.chat_link.is_connected();
            let mesh_retry_at = self.mesh_retry_at;
            let chat_retry_at = self.chat_retry_at;
            let flush_at = self.next_flush_deadline();

            tokio::select! {
                event = self.mesh.next_event(), if mesh_connected => {
                    match event {
                        Ok(event) => self.handle_mesh_event(event).await,
                        Err(e) => {
                            warn!(error = %e, code = e.error_code(), "Mesh receive error");
                            self.stats.transport_errors += 1;
                            self.mark_down(Side::Mesh).await;
                        }
                    }
                }

                event = self.chat.next_event(), if chat_connected => {
                    match event {
                        Ok(event) => self.handle_chat_event(event).await,
                        Err(e) => {
                            warn!(error = %e, code = e.error_code(), "Chat receive error");
                            self.stats.transport_errors += 1;
                            self.mark_down(Side::Chat).await;
                        }
                    }
                }

                _ = sleep_until_opt(mesh_retry_at), if mesh_retry_at.is_some() => {
                    self.reconnect(Side::Mesh).await;
                }

                _ = sleep_until_opt(chat_retry_at), if chat_retry_at.is_some() => {
                    self.reconnect(Side::Chat).await;
                }

                _ = sleep_until_opt(flush_at), if flush_at.is_some() => {
                    self.flush_outbound().await;
                }

                _ = heartbeat.tick() => {
                    let newly_stale = self.registry.scan_stale(Utc::now());
                    if !newly_stale.is_empty() {
                        debug!(count = newly_stale.len(), "Heartbeat scan marked nodes stale");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        BridgeCommand::GetStats(tx) => {
                            let _ = tx.send(self.stats.clone());
                        }
                        BridgeCommand::Shutdown => {
                            info!("Engine shutdown requested");
                            break;
                        }
                    }
                }
            }
        }

        self.drain_on_shutdown().await;

        if let Err(e) = self.mesh.disconnect().await {
            warn!(error = %e, "Error disconnecting mesh adapter");
        }
        if let Err(e) = self.chat.disconnect().await {
            warn!(error = %e, "Error disconnecting chat adapter");
        }

        info!("Bridge engine stopped");
        Ok(())
    }

    // ========================================================================
    // Inbound handling
    // ========================================================================

    async fn handle_mesh_event(&mut self, event: MeshEvent) {
        match event {
            MeshEvent::Message(msg) => {
                let key = PacketKey::new(msg.source.clone(), msg.packet_id);
                if self.dedup.is_duplicate(&key) {
                    self.stats.duplicates_blocked += 1;
                    return;
                }

                if let Some((id, name)) = self.registry.observe(&msg) {
                    self.translator.set_alias(id, name);
                }

                let priority = match &msg.payload {
                    MeshPayload::Telemetry(_)
                    | MeshPayload::NodeInfo { .. }
                    | MeshPayload::Neighbors { .. } => Priority::Low,
                    _ => Priority::Normal,
                };
                let post = self.translator.mesh_to_chat(&msg);
                debug!(
                    source = %msg.source,
                    kind = msg.payload.kind_name(),
                    "Relaying mesh message to chat"
                );
                self.stats.mesh_to_chat += 1;
                self.retry.enqueue(OutboundPayload::Chat(post), priority);
                self.flush_outbound().await;
            }
            MeshEvent::Ack { packet_id } => {
                trace!(packet_id, "Mesh delivery acknowledged");
            }
        }
    }

    async fn handle_chat_event(&mut self, event: ChatEvent) {
        let ChatEvent::Message(msg) = event;

        if is_command(&msg.text) {
            let ctx = RouterContext {
                registry: &self.registry,
                mesh_link: self.mesh_link,
                chat_link: self.chat_link,
                started_at: self.started_at,
                now: Utc::now(),
                default_node: self.config.mesh.default_node_id.clone(),
                local_node: self.local_node.clone(),
            };
            let outcome = self.router.handle(&msg, &ctx);

            match outcome.disposition {
                Disposition::Dispatched => self.stats.commands_dispatched += 1,
                Disposition::Rejected => self.stats.commands_rejected += 1,
                Disposition::Info => self.stats.commands_handled += 1,
            }
            if let Some(dispatch) = outcome.dispatch {
                self.stats.chat_to_mesh += 1;
                self.retry
                    .enqueue(OutboundPayload::Mesh(dispatch), Priority::High);
            }
            self.retry
                .enqueue(OutboundPayload::Chat(outcome.reply), Priority::High);
        } else if let Some(location) = msg.location {
            let relay = self
                .translator
                .chat_location_to_mesh(self.local_node.clone(), location);
            let confirmation = self.translator.location_confirmation(&location);
            debug!(sender = %msg.sender, "Relaying chat location to mesh");
            self.stats.chat_to_mesh += 1;
            self.retry
                .enqueue(OutboundPayload::Mesh(relay), Priority::Normal);
            self.retry
                .enqueue(OutboundPayload::Chat(ChatPost::text(confirmation)), Priority::High);
        } else {
            let relay = self.translator.chat_text_to_mesh(
                self.local_node.clone(),
                &msg.sender,
                &msg.text,
                self.config.mesh.default_node_id.clone(),
            );
            debug!(sender = %msg.sender, "Relaying chat text to mesh");
            self.stats.chat_to_mesh += 1;
            self.retry
                .enqueue(OutboundPayload::Mesh(relay), Priority::Normal);
        }

        self.flush_outbound().await;
    }

    // ========================================================================
    // Outbound delivery
    // ========================================================================

    /// Attempt delivery of everything currently eligible, respecting
    /// the rate limiter. Never blocks on tokens: when a bucket is
    /// empty, delivery resumes on the flush timer.
    async fn flush_outbound(&mut self) {
        self.flush_not_before = None;

        for failure in self.retry.drain_expired() {
            self.report_failure(failure);
        }

        loop {
            let mesh_up = self.mesh_link.is_connected();
            let chat_up = self.chat_link.is_connected();
            let Some(channel) = self.retry.peek_eligible(mesh_up, chat_up) else {
                break;
            };

            if !self.limiter.allow(channel) {
                let refill = match channel {
                    Channel::Mesh => self.config.rate.mesh.refill_interval,
                    Channel::Chat => self.config.rate.chat.refill_interval,
                };
                trace!(%channel, "Rate limiter gated delivery");
                self.flush_not_before = Some(Instant::now() + refill);
                break;
            }

            let Some(item) = self.retry.take_eligible(mesh_up, chat_up) else {
                break;
            };
            self.attempt_delivery(item).await;
        }
    }

    async fn attempt_delivery(&mut self, item: OutboundItem) {
        let result = match &item.payload {
            OutboundPayload::Mesh(msg) => self.mesh.send(msg).await,
            OutboundPayload::Chat(post) => self.chat.send(post).await,
        };

        match result {
            Ok(()) => {
                debug!(item = %item.id, attempts = item.attempts, "Delivered outbound item");
                self.stats.delivered += 1;
            }
            Err(e) => {
                warn!(
                    item = %item.id,
                    attempts = item.attempts,
                    error = %e,
                    "Delivery attempt failed"
                );
                self.stats.transport_errors += 1;
                let side = match item.payload.channel() {
                    Channel::Mesh => Side::Mesh,
                    Channel::Chat => Side::Chat,
                };
                if let Some(failure) = self.retry.record_failure(item) {
                    self.report_failure(failure);
                }
                self.mark_down(side).await;
            }
        }
    }

    /// Surface a terminal delivery failure: log it, count it, and for
    /// mesh-bound items post a chat notice so the sender is not left
    /// guessing (a failed notice itself only logs).
    fn report_failure(&mut self, failure: DeliveryFailure) {
        let DeliveryFailure { item, kind } = failure;
        match kind {
            FailureKind::Expired => {
                self.stats.expired_items += 1;
                warn!(
                    item = %item.id,
                    attempts = item.attempts,
                    what = %item.payload.describe(),
                    "Outbound item expired"
                );
            }
            FailureKind::AttemptsExhausted => {
                self.stats.delivery_failures += 1;
                warn!(
                    item = %item.id,
                    attempts = item.attempts,
                    what = %item.payload.describe(),
                    "Outbound item failed permanently"
                );
            }
        }

        if matches!(item.payload, OutboundPayload::Mesh(_)) {
            self.retry.enqueue(
                OutboundPayload::Chat(ChatPost::text(
                    "⚠️ Failed to send message to the mesh network.",
                )),
                Priority::High,
            );
        }
    }

    // ========================================================================
    // Connection supervision
    // ========================================================================

    /// First connection attempt for one side; failures schedule a retry
    /// rather than aborting startup.
    async fn connect_side(&mut self, side: Side) {
        match side {
            Side::Mesh => self.mesh_link = LinkState::Connecting,
            Side::Chat => self.chat_link = LinkState::Connecting,
        }
        let result = match side {
            Side::Mesh => self.mesh.connect().await,
            Side::Chat => self.chat.connect().await,
        };
        match result {
            Ok(()) => self.on_connected(side),
            Err(e) => {
                warn!(side = side.name(), error = %e, "Initial connect failed");
                self.stats.transport_errors += 1;
                self.schedule_reconnect(side);
            }
        }
    }

    /// Transition a side to DISCONNECTED and schedule a reconnect.
    /// The other side keeps running; outbound items for this side
    /// accumulate in the retry queue.
    async fn mark_down(&mut self, side: Side) {
        let link = match side {
            Side::Mesh => &mut self.mesh_link,
            Side::Chat => &mut self.chat_link,
        };
        if *link == LinkState::Disconnected {
            return;
        }
        *link = LinkState::Disconnected;
        info!(side = side.name(), "Link down, scheduling reconnect");

        // Release transport resources; errors here are uninteresting
        let _ = match side {
            Side::Mesh => self.mesh.disconnect().await,
            Side::Chat => self.chat.disconnect().await,
        };
        self.schedule_reconnect(side);
    }

    fn schedule_reconnect(&mut self, side: Side) {
        let (backoff, retry_at, link) = match side {
            Side::Mesh => (
                &mut self.mesh_backoff,
                &mut self.mesh_retry_at,
                &mut self.mesh_link,
            ),
            Side::Chat => (
                &mut self.chat_backoff,
                &mut self.chat_retry_at,
                &mut self.chat_link,
            ),
        };
        *link = LinkState::Disconnected;
        let delay = backoff.next();
        *retry_at = Some(Instant::now() + delay);
        debug!(
            side = side.name(),
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    async fn reconnect(&mut self, side: Side) {
        match side {
            Side::Mesh => {
                self.mesh_retry_at = None;
                self.mesh_link = LinkState::Connecting;
            }
            Side::Chat => {
                self.chat_retry_at = None;
                self.chat_link = LinkState::Connecting;
            }
        }
        info!(side = side.name(), "Attempting reconnect");

        let result = match side {
            Side::Mesh => self.mesh.connect().await,
            Side::Chat => self.chat.connect().await,
        };
        match result {
            Ok(()) => {
                self.on_connected(side);
                // Queued items for this side are eligible again
                self.flush_outbound().await;
            }
            Err(e) => {
                warn!(side = side.name(), error = %e, "Reconnect failed");
                self.stats.transport_errors += 1;
                self.schedule_reconnect(side);
            }
        }
    }

    fn on_connected(&mut self, side: Side) {
        info!(side = side.name(), "Link connected");
        let reconnected = match side {
            Side::Mesh => {
                self.mesh_link = LinkState::Connected;
                self.mesh_backoff.reset();
                let again = self.mesh_ever_connected;
                self.mesh_ever_connected = true;
                if again {
                    self.stats.mesh_reconnects += 1;
                }
                again
            }
            Side::Chat => {
                self.chat_link = LinkState::Connected;
                self.chat_backoff.reset();
                let again = self.chat_ever_connected;
                self.chat_ever_connected = true;
                if again {
                    self.stats.chat_reconnects += 1;
                }
                again
            }
        };

        if reconnected && self.config.chat.notify_reconnect {
            self.retry.enqueue(
                OutboundPayload::Chat(
                    ChatPost::text(format!("🔌 {} link reconnected.", side.name())).silent(),
                ),
                Priority::High,
            );
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Let in-flight work finish up to the grace deadline, then log
    /// every undelivered item.
    async fn drain_on_shutdown(&mut self) {
        let deadline = Instant::now() + self.config.engine.shutdown_grace;

        while !self.retry.is_empty() && Instant::now() < deadline {
            self.flush_outbound().await;
            if self.retry.is_empty() {
                break;
            }
            let wake = self
                .next_flush_deadline()
                .unwrap_or(deadline)
                .min(deadline);
            tokio::time::sleep_until(wake).await;
        }

        let undelivered = self.retry.drain_all();
        if !undelivered.is_empty() {
            warn!(count = undelivered.len(), "Undelivered items at shutdown");
            for item in undelivered {
                warn!(
                    item = %item.id,
                    attempts = item.attempts,
                    what = %item.payload.describe(),
                    "Undelivered"
                );
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn next_flush_deadline(&self) -> Option<Instant> {
        let wake = self.retry.next_wake(
            self.mesh_link.is_connected(),
            self.chat_link.is_connected(),
        )?;
        Some(match self.flush_not_before {
            Some(not_before) => wake.max(not_before),
            None => wake,
        })
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
