//! Camera Capture Layer
//!
//! The camera device and its permission subsystem sit behind the [`Camera`]
//! trait. The throttle loop that drives periodic captures lives in
//! [`throttle`].

pub mod file_camera;
pub mod frame;
pub mod throttle;

use async_trait::async_trait;
use std::fmt;

use crate::capture::frame::CapturedFrame;
use crate::error::{CaptureError, PermissionError};

pub use file_camera::FileCamera;
pub use throttle::{CaptureLoop, LoopEvent, StreamingState};

/// Which way a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraPosition {
    Back,
    Front,
    External,
}

/// A camera the device reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    /// Stable device identifier
    pub id: String,
    /// Where the camera points
    pub position: CameraPosition,
}

impl fmt::Display for CameraDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.id, self.position)
    }
}

/// Authorization as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Granted,
    NotDetermined,
    Denied,
    Restricted,
}

impl AuthorizationStatus {
    /// Lowercase name, as shown to the user
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Granted => "granted",
            AuthorizationStatus::NotDetermined => "not-determined",
            AuthorizationStatus::Denied => "denied",
            AuthorizationStatus::Restricted => "restricted",
        }
    }
}

/// Contract the pipeline needs from a camera
#[async_trait]
pub trait Camera: Send + Sync {
    /// Enumerate available camera devices
    async fn list_devices(&self) -> Result<Vec<CameraDevice>, CaptureError>;

    /// Current authorization without prompting
    async fn permission_status(&self) -> Result<AuthorizationStatus, PermissionError>;

    /// Prompt for authorization and wait for the decision
    async fn request_permission(&self) -> Result<AuthorizationStatus, PermissionError>;

    /// Take a single still from `device`
    async fn capture(&self, device: &CameraDevice) -> Result<CapturedFrame, CaptureError>;
}

/// Pick the first back-facing camera, falling back to the first one listed.
pub fn select_device(devices: &[CameraDevice]) -> Option<CameraDevice> {
    devices
        .iter()
        .find(|d| d.position == CameraPosition::Back)
        .or_else(|| devices.first())
        .cloned()
}
