//! Transport Session
//!
//! Owns the one link to the inference service. Connection attempts, the
//! reconnection timer and the live link are all stored here, so
//! [`TransportSession::next_event`] can be raced in a `select!` without
//! losing progress. A dropped link is closed by a stored future as well:
//! state changes happen first, the close handshake is driven afterwards.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::{
    ConnectionState, Connector, Inbound, Link, LinkFuture, ReconnectPolicy, DETECTIONS_EVENT,
    ERROR_EVENT, FRAME_EVENT,
};
use crate::error::SendError;
use crate::vision::{DetectionSet, EncodedFrame};

/// Upper bound for one frame write
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for a graceful close handshake
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Something the view needs to react to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Link established; sending is enabled
    Connected,
    /// Peer closed the link
    Disconnected { reconnect_in: Option<Duration> },
    /// Connecting failed or the link broke
    Failed {
        error: String,
        reconnect_in: Option<Duration>,
    },
    /// A scheduled reconnection attempt has started
    Reconnecting { attempt: u32, max_attempts: u32 },
    /// A full detection set arrived
    Detections(DetectionSet),
    /// The service reported a failure for a frame
    ServiceError(String),
}

/// What happened to a frame handed to [`TransportSession::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Not connected; the frame was discarded without touching the link
    Dropped,
    /// The write failed; logged only
    Failed,
}

/// Single long-lived connection with bounded auto-reconnect
pub struct TransportSession {
    address: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: ConnectionState,
    link: Option<Box<dyn Link>>,
    pending: Option<LinkFuture>,
    closing: Option<BoxFuture<'static, ()>>,
    retry_at: Option<Instant>,
    attempts: u32,
    torn_down: bool,
}

impl TransportSession {
    pub fn new(address: impl Into<String>, connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            address: address.into(),
            connector,
            policy,
            state: ConnectionState::Disconnected,
            link: None,
            pending: None,
            closing: None,
            retry_at: None,
            attempts: 0,
            torn_down: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.link.is_some()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Begin connecting. No-op if a link or an attempt already exists.
    pub fn connect(&mut self) -> bool {
        if self.torn_down || self.link.is_some() || self.pending.is_some() {
            return false;
        }
        info!("Connecting to inference service at {}", self.address);
        self.retry_at = None;
        self.state = ConnectionState::Connecting;
        self.pending = Some(self.connector.open(&self.address));
        true
    }

    /// External retry trigger: restart the attempt budget.
    ///
    /// Only acts while disconnected or in error.
    pub fn reconnect(&mut self) -> bool {
        if !matches!(self.state, ConnectionState::Disconnected | ConnectionState::Error) {
            return false;
        }
        self.attempts = 0;
        self.connect()
    }

    /// Wait for the next session event. Never resolves while there is
    /// nothing to wait for (torn down, or retries exhausted).
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            if let Some(closing) = self.closing.as_mut() {
                closing.await;
                self.closing = None;
            }

            if let Some(link) = self.link.as_mut() {
                match link.recv().await {
                    Some(Ok(inbound)) => {
                        if let Some(event) = dispatch(inbound) {
                            return event;
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!("Connection error: {}", e);
                        self.release_link();
                        self.state = ConnectionState::Error;
                        return SessionEvent::Failed {
                            error: e.to_string(),
                            reconnect_in: self.schedule_retry(),
                        };
                    }
                    None => {
                        info!("Disconnected from inference service");
                        self.release_link();
                        self.state = ConnectionState::Disconnected;
                        return SessionEvent::Disconnected {
                            reconnect_in: self.schedule_retry(),
                        };
                    }
                }
            }

            if let Some(at) = self.retry_at {
                time::sleep_until(at).await;
                self.retry_at = None;
                self.state = ConnectionState::Connecting;
                self.pending = Some(self.connector.open(&self.address));
                info!(
                    "Reconnecting to {} (attempt {}/{})",
                    self.address, self.attempts, self.policy.max_attempts
                );
                return SessionEvent::Reconnecting {
                    attempt: self.attempts,
                    max_attempts: self.policy.max_attempts,
                };
            }

            if let Some(pending) = self.pending.as_mut() {
                let result = pending.await;
                self.pending = None;
                return match result {
                    Ok(link) => {
                        info!("Connected to inference service at {}", self.address);
                        self.link = Some(link);
                        self.state = ConnectionState::Connected;
                        self.attempts = 0;
                        SessionEvent::Connected
                    }
                    Err(e) => {
                        warn!("Connection attempt failed: {}", e);
                        self.state = ConnectionState::Error;
                        SessionEvent::Failed {
                            error: e.to_string(),
                            reconnect_in: self.schedule_retry(),
                        }
                    }
                };
            }

            return std::future::pending().await;
        }
    }

    /// Fire-and-forget frame send. Frames are dropped, never queued, while
    /// the session is not connected.
    pub async fn send(&mut self, frame: EncodedFrame) -> SendOutcome {
        if self.state != ConnectionState::Connected {
            debug!("Dropping frame while {}", self.state);
            return SendOutcome::Dropped;
        }
        let Some(link) = self.link.as_mut() else {
            return SendOutcome::Dropped;
        };
        let payload = serde_json::Value::String(frame.into_string());
        let result = match time::timeout(SEND_TIMEOUT, link.emit(FRAME_EVENT, payload)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout(SEND_TIMEOUT)),
        };
        match result {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                warn!("Frame send failed: {}", e);
                SendOutcome::Failed
            }
        }
    }

    /// Close the link and forget every pending attempt. Idempotent.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.pending = None;
        self.retry_at = None;
        self.state = ConnectionState::Disconnected;
        self.release_link();
        if let Some(closing) = self.closing.take() {
            closing.await;
        }
        debug!("Transport session torn down");
    }

    /// Detach the live link and queue its close behind any earlier one
    fn release_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let previous = self.closing.take();
        self.closing = Some(
            async move {
                if let Some(previous) = previous {
                    previous.await;
                }
                close_link(link).await;
            }
            .boxed(),
        );
    }

    fn schedule_retry(&mut self) -> Option<Duration> {
        if self.torn_down {
            return None;
        }
        if self.attempts >= self.policy.max_attempts {
            warn!(
                "Giving up on {} after {} reconnection attempts",
                self.address, self.attempts
            );
            self.state = ConnectionState::Error;
            return None;
        }
        self.attempts += 1;
        self.retry_at = Some(Instant::now() + self.policy.delay);
        Some(self.policy.delay)
    }
}

async fn close_link(mut link: Box<dyn Link>) {
    if time::timeout(CLOSE_TIMEOUT, link.close()).await.is_err() {
        debug!("Link close timed out after {:?}", CLOSE_TIMEOUT);
    }
}

fn dispatch(inbound: Inbound) -> Option<SessionEvent> {
    match inbound.event.as_str() {
        DETECTIONS_EVENT => match DetectionSet::from_payload(inbound.payload) {
            Ok(set) => Some(SessionEvent::Detections(set)),
            Err(e) => {
                warn!("Ignoring malformed detections payload: {}", e);
                None
            }
        },
        ERROR_EVENT => {
            let message = inbound
                .payload
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| inbound.payload.to_string());
            warn!("Inference service error: {}", message);
            Some(SessionEvent::ServiceError(message))
        }
        other => {
            debug!("Ignoring unhandled event '{}'", other);
            None
        }
    }
}
