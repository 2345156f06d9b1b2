//! Error types for bridge operations
//!
//! The taxonomy mirrors how errors propagate through the bridge:
//! transport failures trigger reconnection, delivery failures are
//! reported and dropped, authorization and command errors become
//! user-visible replies, and only configuration errors are fatal.

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Transport Errors =====
    /// Adapter-level I/O failure; triggers a reconnect, never fatal
    #[error("Transport error on {side}: {reason}")]
    Transport {
        /// Which adapter failed ("mesh" or "chat")
        side: &'static str,
        /// Underlying failure description
        reason: String,
    },

    /// Adapter is not connected
    #[error("{side} adapter is not connected")]
    NotConnected {
        /// Which adapter ("mesh" or "chat")
        side: &'static str,
    },

    /// Connection attempt timed out
    #[error("Connection timeout after {duration_ms}ms")]
    ConnectionTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    // ===== Delivery Errors =====
    /// Outbound item exceeded its expiry deadline
    #[error("Delivery expired after {attempts} attempts")]
    DeliveryExpired {
        /// Attempts made before expiry
        attempts: u32,
    },

    /// Outbound item exceeded the configured attempt limit
    #[error("Delivery failed after {attempts} attempts: {reason}")]
    DeliveryFailed {
        /// Attempts made
        attempts: u32,
        /// Last failure reason
        reason: String,
    },

    // ===== Command Errors =====
    /// Sender is not in the authorization set
    #[error("User {user_id} is not authorized for this command")]
    AuthorizationDenied {
        /// The rejected chat user id
        user_id: i64,
    },

    /// Command arguments did not parse
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// Command referenced a node the bridge has never seen
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    // ===== Configuration Errors =====
    /// Invalid configuration value; fatal at startup
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing required configuration; fatal at startup
    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    // ===== General Errors =====
    /// Control channel to the engine closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Engine was asked to run twice
    #[error("Bridge engine is already running")]
    AlreadyRunning,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BridgeError::Transport { .. }
                | BridgeError::NotConnected { .. }
                | BridgeError::ConnectionTimeout { .. }
                | BridgeError::Io(_)
        )
    }

    /// Check if this error must stop startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidConfig(_) | BridgeError::MissingConfig(_)
        )
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Transport { .. } => "TRANSPORT_ERROR",
            BridgeError::NotConnected { .. } => "NOT_CONNECTED",
            BridgeError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            BridgeError::DeliveryExpired { .. } => "DELIVERY_EXPIRED",
            BridgeError::DeliveryFailed { .. } => "DELIVERY_FAILED",
            BridgeError::AuthorizationDenied { .. } => "AUTHORIZATION_DENIED",
            BridgeError::MalformedCommand(_) => "MALFORMED_COMMAND",
            BridgeError::UnknownNode(_) => "UNKNOWN_NODE",
            BridgeError::InvalidConfig(_) => "INVALID_CONFIG",
            BridgeError::MissingConfig(_) => "MISSING_CONFIG",
            BridgeError::ChannelClosed => "CHANNEL_CLOSED",
            BridgeError::AlreadyRunning => "ALREADY_RUNNING",
            BridgeError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

// Conversion from tokio mpsc send error
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BridgeError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BridgeError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = BridgeError::Transport {
            side: "mesh",
            reason: "serial gone".to_string(),
        };
        assert_eq!(err.error_code(), "TRANSPORT_ERROR");
    }

    #[test]
    fn test_is_retriable() {
        assert!(BridgeError::ConnectionTimeout { duration_ms: 5000 }.is_retriable());
        assert!(BridgeError::NotConnected { side: "chat" }.is_retriable());
        assert!(!BridgeError::AuthorizationDenied { user_id: 7 }.is_retriable());
        assert!(!BridgeError::MissingConfig("bot_token").is_retriable());
    }

    #[test]
    fn test_is_fatal() {
        assert!(BridgeError::MissingConfig("chat_id").is_fatal());
        assert!(BridgeError::InvalidConfig("bad rate".to_string()).is_fatal());
        assert!(!BridgeError::DeliveryExpired { attempts: 3 }.is_fatal());
    }
}
