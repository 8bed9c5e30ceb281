//! Transport Layer
//!
//! The connection to the inference service is split in two seams:
//! a [`Connector`] opens links, and a [`Link`] carries named events both
//! ways. [`TransportSession`] owns the single live link and handles
//! reconnection; everything else talks to the service through it.

pub mod session;
pub mod socketio;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::time::Duration;

use crate::error::{ConnectionError, SendError};

pub use session::{SendOutcome, SessionEvent, TransportSession};
pub use socketio::SocketIoConnector;

/// Outbound event carrying an encoded frame
pub const FRAME_EVENT: &str = "frame";
/// Inbound event carrying a detection set
pub const DETECTIONS_EVENT: &str = "detections";
/// Inbound event carrying a service-side failure
pub const ERROR_EVENT: &str = "error";

/// Lifecycle of the connection to the inference service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Error => "Connection error",
        };
        f.write_str(text)
    }
}

/// A named event received from the service
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub event: String,
    pub payload: serde_json::Value,
}

/// One open, bidirectional connection
#[async_trait]
pub trait Link: Send {
    /// Send a named event. No acknowledgement is awaited.
    async fn emit(&mut self, event: &str, payload: serde_json::Value) -> Result<(), SendError>;

    /// Next inbound event. `None` once the peer has closed the connection.
    ///
    /// Must be cancel-safe: dropping the future loses no event.
    async fn recv(&mut self) -> Option<Result<Inbound, ConnectionError>>;

    /// Close the connection
    async fn close(&mut self);
}

/// In-progress connection attempt
pub type LinkFuture = BoxFuture<'static, Result<Box<dyn Link>, ConnectionError>>;

/// Opens links to an address
pub trait Connector: Send + Sync {
    /// Start connecting. The returned future owns everything it needs.
    fn open(&self, address: &str) -> LinkFuture;
}

/// Bounded, fixed-delay reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnection attempts after a connection is lost or refused
    pub max_attempts: u32,
    /// Delay before every attempt
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}
