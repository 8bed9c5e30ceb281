//! Error taxonomy for the capture/transmit/overlay pipeline
//!
//! None of these are fatal: each is caught where it originates, logged, and
//! reflected in the view state.

use std::time::Duration;
use thiserror::Error;

/// Camera authorization could not be obtained
#[derive(Debug, Clone, Error)]
pub enum PermissionError {
    #[error("camera permission query failed: {0}")]
    Query(String),
}

/// Establishing or keeping the inference connection failed
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("handshake rejected: {0}")]
    Handshake(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("heartbeat timed out after {0:?}")]
    HeartbeatTimeout(Duration),
    #[error("connection lost: {0}")]
    Lost(String),
}

/// Grabbing a still from the camera failed
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("no camera device available")]
    NoDevice,
    #[error("camera device {0} is unavailable")]
    DeviceUnavailable(String),
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
    #[error("capture failed: {0}")]
    Device(String),
}

/// Turning a raw capture into a transmittable payload failed
#[derive(Debug, Clone, Error)]
pub enum EncodingError {
    #[error("raw frame buffer does not match {width}x{height} RGBA")]
    InvalidFrame { width: u32, height: u32 },
    #[error("JPEG compression failed: {0}")]
    Compress(String),
    #[error("encoded payload is empty")]
    Empty,
    #[error("encoded payload is missing the {0} marker")]
    MissingMarker(&'static str),
}

/// A fire-and-forget send failed
#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("payload serialization failed: {0}")]
    Serialize(String),
    #[error("write to connection failed: {0}")]
    Write(String),
    #[error("write to connection timed out after {0:?}")]
    Timeout(Duration),
}

/// Any failure that aborts a single capture cycle
#[derive(Debug, Clone, Error)]
pub enum CycleError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}
