//! Snapshot of the running view

use parking_lot::RwLock;
use std::sync::Arc;

use crate::capture::StreamingState;
use crate::overlay::OverlayRegion;
use crate::permission::PermissionState;
use crate::transport::ConnectionState;

/// View state shared with the front end
pub type SharedViewState = Arc<RwLock<ViewState>>;

/// Pipeline counters since the view started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames written to the connection
    pub frames_sent: u64,
    /// Encoded frames discarded because the session was not connected
    pub frames_dropped: u64,
    /// Ticks skipped for a busy loop or an unmet precondition
    pub ticks_skipped: u64,
    /// Capture cycles that failed to capture or encode
    pub cycle_failures: u64,
    /// Detection sets applied to the overlay
    pub detection_sets: u64,
}

/// Everything a front end needs to draw the view
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub permission: PermissionState,
    pub connection: ConnectionState,
    pub streaming: StreamingState,
    /// Permission or connection status line
    pub status_text: String,
    /// Summary of the latest result
    pub results_text: String,
    /// Last per-frame or service failure
    pub last_error: Option<String>,
    /// Overlay regions in surface coordinates
    pub regions: Vec<OverlayRegion>,
    pub stats: PipelineStats,
    /// Bumped on every published change
    pub revision: u64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            permission: PermissionState::Unknown,
            connection: ConnectionState::Disconnected,
            streaming: StreamingState::Idle,
            status_text: "Checking camera permission...".to_string(),
            results_text: "No results yet".to_string(),
            last_error: None,
            regions: Vec::new(),
            stats: PipelineStats::default(),
            revision: 0,
        }
    }
}

impl ViewState {
    pub fn is_streaming(&self) -> bool {
        self.streaming == StreamingState::Streaming
    }

    /// One-line summary for the terminal
    pub fn summary(&self) -> String {
        format!(
            "{} | {} | {} | sent {} dropped {} skipped {} failed {} results {}",
            self.status_text,
            self.connection,
            if self.is_streaming() { "streaming" } else { "idle" },
            self.stats.frames_sent,
            self.stats.frames_dropped,
            self.stats.ticks_skipped,
            self.stats.cycle_failures,
            self.stats.detection_sets
        )
    }
}
