//! Message types sent to the view loop

/// Commands accepted by the running view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewCommand {
    /// Begin periodic capture
    StartStreaming,
    /// Stop periodic capture
    StopStreaming,
    /// Re-issue the camera permission request after a denial
    RetryPermission,
    /// Restart the reconnection budget after the session gave up
    Reconnect,
    /// Log the current status
    Status,
    /// Tear everything down and exit
    Shutdown,
}

impl ViewCommand {
    /// Parse a line typed on the terminal
    pub fn from_input(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" => Some(ViewCommand::StartStreaming),
            "stop" => Some(ViewCommand::StopStreaming),
            "retry" => Some(ViewCommand::RetryPermission),
            "reconnect" => Some(ViewCommand::Reconnect),
            "status" => Some(ViewCommand::Status),
            "quit" | "exit" => Some(ViewCommand::Shutdown),
            _ => None,
        }
    }
}
