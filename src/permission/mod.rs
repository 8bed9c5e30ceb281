//! Permission Gate
//!
//! Resolves camera authorization before anything else is allowed to run.
//! The decision is held as an owned future so it can be raced against other
//! work and dropped on teardown.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{info, warn};

use crate::capture::{AuthorizationStatus, Camera};
use crate::error::PermissionError;

type Decision = BoxFuture<'static, Result<AuthorizationStatus, PermissionError>>;

/// Outcome of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// Tri-state camera authorization gate
#[derive(Default)]
pub struct PermissionGate {
    state: PermissionState,
    last_status: Option<AuthorizationStatus>,
    camera: Option<Arc<dyn Camera>>,
    pending: Option<Decision>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PermissionState {
        self.state
    }

    pub fn is_granted(&self) -> bool {
        self.state == PermissionState::Granted
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Query the current authorization, prompting if it was never decided.
    ///
    /// Only the first activation does anything.
    pub fn activate(&mut self, camera: Arc<dyn Camera>) -> bool {
        if self.camera.is_some() {
            return false;
        }
        info!("Checking camera permission");
        self.camera = Some(camera.clone());
        self.pending = Some(Box::pin(async move {
            match camera.permission_status().await? {
                AuthorizationStatus::NotDetermined => camera.request_permission().await,
                status => Ok(status),
            }
        }));
        true
    }

    /// Re-issue the permission request after a denial
    pub fn retry(&mut self) -> bool {
        if self.state != PermissionState::Denied || self.pending.is_some() {
            return false;
        }
        let Some(camera) = self.camera.clone() else {
            return false;
        };
        info!("Retrying camera permission request");
        self.state = PermissionState::Unknown;
        self.pending = Some(Box::pin(async move { camera.request_permission().await }));
        true
    }

    /// Wait for the pending decision. Never resolves when nothing is pending.
    ///
    /// Anything other than an explicit grant is a denial.
    pub async fn decided(&mut self) -> PermissionState {
        let Some(pending) = self.pending.as_mut() else {
            return std::future::pending().await;
        };
        let result = pending.await;
        self.pending = None;

        self.state = match result {
            Ok(AuthorizationStatus::Granted) => {
                info!("Camera permission granted");
                self.last_status = Some(AuthorizationStatus::Granted);
                PermissionState::Granted
            }
            Ok(status) => {
                warn!("Camera permission denied (status: {})", status.as_str());
                self.last_status = Some(status);
                PermissionState::Denied
            }
            Err(e) => {
                warn!("Camera permission check failed: {}", e);
                self.last_status = None;
                PermissionState::Denied
            }
        };
        self.state
    }

    /// Forget any outstanding decision
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// User-facing description of the gate
    pub fn status_text(&self) -> String {
        match self.state {
            PermissionState::Unknown => "Checking camera permission...".to_string(),
            PermissionState::Granted => "Camera permission granted".to_string(),
            PermissionState::Denied => format!(
                "Camera permission denied (Status: {})",
                self.last_status.map(|s| s.as_str()).unwrap_or("error")
            ),
        }
    }
}
