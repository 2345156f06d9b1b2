//! Testing utilities: scriptable in-memory adapters
//!
//! [`MockMeshAdapter`] and [`MockChatAdapter`] implement the adapter
//! traits over in-memory channels. A driver handle, obtained before
//! the adapter moves into the engine, injects inbound events, records
//! outbound sends, and scripts failures (refused connects, failing
//! sends, transport errors mid-stream). Used by the engine unit tests
//! and the integration tests; not compiled into downstream binaries
//! unless imported explicitly.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use meshgram_core::{ChatMessage, ChatPost, MeshMessage};

use crate::adapter::{ChatAdapter, ChatEvent, MeshAdapter, MeshEvent};
use crate::error::{BridgeError, Result};

/// Scripted failure state shared between a mock adapter and its driver
#[derive(Debug, Default)]
struct MockControl {
    /// Refuse this many upcoming connect() calls
    fail_connects: u32,
    /// Fail every send() while set
    fail_sends: bool,
    /// Total connect() calls observed
    connects: u32,
}

/// Driver handle for one mock adapter
#[derive(Clone)]
pub struct MeshDriver {
    event_tx: mpsc::UnboundedSender<Result<MeshEvent>>,
    sent: Arc<Mutex<Vec<MeshMessage>>>,
    control: Arc<Mutex<MockControl>>,
}

impl MeshDriver {
    /// Inject an inbound mesh event
    pub fn inject(&self, event: MeshEvent) {
        let _ = self.event_tx.send(Ok(event));
    }

    /// Inject an inbound mesh message
    pub fn inject_message(&self, msg: MeshMessage) {
        self.inject(MeshEvent::Message(msg));
    }

    /// Make the adapter's event stream yield a transport error
    pub fn inject_error(&self) {
        let _ = self.event_tx.send(Err(BridgeError::Transport {
            side: "mesh",
            reason: "scripted failure".to_string(),
        }));
    }

    /// Everything the engine sent to the mesh so far
    pub fn sent(&self) -> Vec<MeshMessage> {
        self.sent.lock().clone()
    }

    /// Fail every send() while enabled
    pub fn set_fail_sends(&self, fail: bool) {
        self.control.lock().fail_sends = fail;
    }

    /// Refuse the next `n` connect() calls
    pub fn fail_next_connects(&self, n: u32) {
        self.control.lock().fail_connects = n;
    }

    /// Number of connect() calls observed
    pub fn connect_count(&self) -> u32 {
        self.control.lock().connects
    }
}

/// In-memory mesh adapter for tests
pub struct MockMeshAdapter {
    connected: bool,
    event_rx: mpsc::UnboundedReceiver<Result<MeshEvent>>,
    driver: MeshDriver,
}

impl MockMeshAdapter {
    /// Create a new mock mesh adapter
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let driver = MeshDriver {
            event_tx,
            sent: Arc::new(Mutex::new(Vec::new())),
            control: Arc::new(Mutex::new(MockControl::default())),
        };
        Self {
            connected: false,
            event_rx,
            driver,
        }
    }

    /// Driver handle; grab this before moving the adapter into the engine
    pub fn driver(&self) -> MeshDriver {
        self.driver.clone()
    }
}

impl Default for MockMeshAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MeshAdapter for MockMeshAdapter {
    async fn connect(&mut self) -> Result<()> {
        let mut control = self.driver.control.lock();
        control.connects += 1;
        if control.fail_connects > 0 {
            control.fail_connects -= 1;
            return Err(BridgeError::Transport {
                side: "mesh",
                reason: "scripted connect refusal".to_string(),
            });
        }
        drop(control);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn next_event(&mut self) -> Result<MeshEvent> {
        match self.event_rx.recv().await {
            Some(event) => event,
            // Driver dropped: stay quiet rather than erroring forever
            None => std::future::pending().await,
        }
    }

    async fn send(&mut self, message: &MeshMessage) -> Result<()> {
        if self.driver.control.lock().fail_sends {
            return Err(BridgeError::Transport {
                side: "mesh",
                reason: "scripted send failure".to_string(),
            });
        }
        self.driver.sent.lock().push(message.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "MockMeshAdapter"
    }
}

/// Driver handle for one mock chat adapter
#[derive(Clone)]
pub struct ChatDriver {
    event_tx: mpsc::UnboundedSender<Result<ChatEvent>>,
    posted: Arc<Mutex<Vec<ChatPost>>>,
    control: Arc<Mutex<MockControl>>,
}

impl ChatDriver {
    /// Inject an inbound chat message
    pub fn inject_message(&self, msg: ChatMessage) {
        let _ = self.event_tx.send(Ok(ChatEvent::Message(msg)));
    }

    /// Make the adapter's event stream yield a transport error
    pub fn inject_error(&self) {
        let _ = self.event_tx.send(Err(BridgeError::Transport {
            side: "chat",
            reason: "scripted failure".to_string(),
        }));
    }

    /// Everything the engine posted to the chat so far
    pub fn posted(&self) -> Vec<ChatPost> {
        self.posted.lock().clone()
    }

    /// Fail every send() while enabled
    pub fn set_fail_sends(&self, fail: bool) {
        self.control.lock().fail_sends = fail;
    }

    /// Refuse the next `n` connect() calls
    pub fn fail_next_connects(&self, n: u32) {
        self.control.lock().fail_connects = n;
    }

    /// Number of connect() calls observed
    pub fn connect_count(&self) -> u32 {
        self.control.lock().connects
    }
}

/// In-memory chat adapter for tests
pub struct MockChatAdapter {
    connected: bool,
    event_rx: mpsc::UnboundedReceiver<Result<ChatEvent>>,
    driver: ChatDriver,
}

impl MockChatAdapter {
    /// Create a new mock chat adapter
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let driver = ChatDriver {
            event_tx,
            posted: Arc::new(Mutex::new(Vec::new())),
            control: Arc::new(Mutex::new(MockControl::default())),
        };
        Self {
            connected: false,
            event_rx,
            driver,
        }
    }

    /// Driver handle; grab this before moving the adapter into the engine
    pub fn driver(&self) -> ChatDriver {
        self.driver.clone()
    }
}

impl Default for MockChatAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChatAdapter for MockChatAdapter {
    async fn connect(&mut self) -> Result<()> {
        let mut control = self.driver.control.lock();
        control.connects += 1;
        if control.fail_connects > 0 {
            control.fail_connects -= 1;
            return Err(BridgeError::Transport {
                side: "chat",
                reason: "scripted connect refusal".to_string(),
            });
        }
        drop(control);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn next_event(&mut self) -> Result<ChatEvent> {
        match self.event_rx.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn send(&mut self, post: &ChatPost) -> Result<()> {
        if self.driver.control.lock().fail_sends {
            return Err(BridgeError::Transport {
                side: "chat",
                reason: "scripted send failure".to_string(),
            });
        }
        self.driver.posted.lock().push(post.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "MockChatAdapter"
    }
}
