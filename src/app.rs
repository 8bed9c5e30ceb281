//! Application Coordinator
//!
//! [`InferenceView`] owns the permission gate, the transport session, the
//! capture loop, the encoder and the overlay model, and drives all of them
//! from one cooperative event loop. After every transition it publishes a
//! fresh [`ViewState`] for the front end.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{select_device, Camera, CameraDevice, CaptureLoop, LoopEvent};
use crate::config::AppConfig;
use crate::error::{CaptureError, CycleError};
use crate::overlay::{format_label, DetectionOverlay, SurfaceSize};
use crate::permission::{PermissionGate, PermissionState};
use crate::shared::{PipelineStats, SharedViewState, ViewCommand, ViewState};
use crate::transport::{Connector, ReconnectPolicy, SendOutcome, SessionEvent, TransportSession};
use crate::vision::{capture_cycle, DetectionSet, EncodedFrame, EncoderConfig, FrameEncoder};

type CycleResult = Result<EncodedFrame, CycleError>;
type DeviceLookup = BoxFuture<'static, Result<Vec<CameraDevice>, CaptureError>>;

/// Static settings for one view lifetime
#[derive(Debug, Clone)]
pub struct ViewOptions {
    /// Inference service address
    pub address: String,
    pub reconnect: ReconnectPolicy,
    /// Capture tick period
    pub interval: Duration,
    /// Upper bound for one still capture
    pub capture_timeout: Duration,
    pub encoder: EncoderConfig,
    /// Surface overlays are rendered onto
    pub surface: SurfaceSize,
    /// Start streaming once permission is granted
    pub autostart: bool,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ViewOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            address: config.server.address.clone(),
            reconnect: ReconnectPolicy {
                max_attempts: config.server.reconnect_attempts,
                delay: Duration::from_millis(config.server.reconnect_delay_ms),
            },
            interval: Duration::from_millis(config.capture.interval_ms.max(1)),
            capture_timeout: Duration::from_millis(config.capture.timeout_ms),
            encoder: EncoderConfig {
                width: config.encoder.width,
                height: config.encoder.height,
                quality: config.encoder.quality,
            },
            surface: SurfaceSize::new(config.overlay.surface_width, config.overlay.surface_height),
            autostart: config.capture.autostart,
        }
    }
}

/// Main application coordinator
pub struct InferenceView {
    options: ViewOptions,
    camera: Arc<dyn Camera>,
    device: Option<CameraDevice>,
    device_lookup: Option<DeviceLookup>,
    encoder: Arc<FrameEncoder>,
    gate: PermissionGate,
    session: TransportSession,
    capture: CaptureLoop<CycleResult>,
    overlay: DetectionOverlay,
    stats: PipelineStats,
    results_text: String,
    last_error: Option<String>,
    state: SharedViewState,
    torn_down: bool,
}

impl InferenceView {
    /// Create a new view. Nothing happens until [`InferenceView::run`].
    pub fn new(options: ViewOptions, camera: Arc<dyn Camera>, connector: Arc<dyn Connector>) -> Self {
        let encoder = FrameEncoder::new(options.encoder);
        let session = TransportSession::new(options.address.clone(), connector, options.reconnect);
        let capture = CaptureLoop::new(options.interval);
        let overlay = DetectionOverlay::new(encoder.frame_size());

        Self {
            camera,
            device: None,
            device_lookup: None,
            encoder: Arc::new(encoder),
            gate: PermissionGate::new(),
            session,
            capture,
            overlay,
            stats: PipelineStats::default(),
            results_text: ViewState::default().results_text,
            last_error: None,
            state: SharedViewState::default(),
            torn_down: false,
            options,
        }
    }

    /// Handle to the published view state
    pub fn state(&self) -> SharedViewState {
        self.state.clone()
    }

    /// Drive the view until a shutdown command or cancellation, then tear
    /// everything down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ViewCommand>, shutdown: CancellationToken) {
        info!("Inference view starting (service {})", self.session.address());
        self.gate.activate(self.camera.clone());
        self.publish();

        let mut commands_open = true;
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                command = commands.recv(), if commands_open => match command {
                    Some(ViewCommand::Shutdown) => break,
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("Command channel closed");
                        commands_open = false;
                    }
                },

                decision = self.gate.decided() => self.on_permission(decision),

                devices = next_lookup(&mut self.device_lookup) => self.on_devices(devices),

                event = self.session.next_event() => self.on_session_event(event),

                event = self.capture.next() => match event {
                    LoopEvent::Tick => self.on_tick(),
                    LoopEvent::Completed(result) => {
                        // A stalled write must not hold off shutdown
                        if !unless_cancelled(&shutdown, self.on_cycle_complete(result)).await {
                            break;
                        }
                    }
                },
            }
            self.publish();
        }

        self.teardown().await;
        info!("Inference view stopped");
    }

    fn on_command(&mut self, command: ViewCommand) {
        match command {
            ViewCommand::StartStreaming => {
                if self.capture.start() {
                    info!("Streaming started ({:?} interval)", self.capture.period());
                }
            }
            ViewCommand::StopStreaming => {
                if self.capture.stop() {
                    info!("Streaming stopped");
                }
            }
            ViewCommand::RetryPermission => {
                if self.gate.is_pending() {
                    debug!("Permission decision already pending");
                } else if !self.gate.retry() {
                    debug!("Permission retry ignored ({:?})", self.gate.state());
                }
            }
            ViewCommand::Reconnect => {
                if !self.session.reconnect() {
                    debug!("Reconnect ignored while {}", self.session.state());
                }
            }
            ViewCommand::Status => info!("{}", self.state.read().summary()),
            ViewCommand::Shutdown => {}
        }
    }

    fn on_permission(&mut self, decision: PermissionState) {
        if decision != PermissionState::Granted {
            warn!("{}", self.gate.status_text());
            return;
        }

        if self.device.is_none() && self.device_lookup.is_none() {
            let camera = self.camera.clone();
            let timeout = self.options.capture_timeout;
            self.device_lookup = Some(
                async move {
                    match time::timeout(timeout, camera.list_devices()).await {
                        Ok(result) => result,
                        Err(_) => Err(CaptureError::Timeout(timeout)),
                    }
                }
                .boxed(),
            );
        }

        self.session.connect();
        if self.options.autostart && self.capture.start() {
            info!("Streaming started ({:?} interval)", self.capture.period());
        }
    }

    fn on_devices(&mut self, devices: Result<Vec<CameraDevice>, CaptureError>) {
        self.device = match devices {
            Ok(devices) => select_device(&devices),
            Err(e) => {
                warn!("Failed to list camera devices: {}", e);
                None
            }
        };
        match &self.device {
            Some(device) => info!("Using camera {}", device),
            None => {
                warn!("{}", CaptureError::NoDevice);
                self.last_error = Some(CaptureError::NoDevice.to_string());
            }
        }
    }

    fn on_tick(&mut self) {
        let skip_reason = if self.capture.is_busy() {
            Some("previous capture still in flight")
        } else if !self.gate.is_granted() {
            Some("camera permission not granted")
        } else if self.device.is_none() {
            Some("no camera device")
        } else if !self.session.is_connected() {
            Some("not connected")
        } else {
            None
        };

        if let Some(reason) = skip_reason {
            debug!("Skipping capture tick: {}", reason);
            self.stats.ticks_skipped += 1;
            return;
        }

        let Some(device) = self.device.clone() else {
            return;
        };
        let cycle = capture_cycle(
            self.camera.clone(),
            device,
            self.encoder.clone(),
            self.options.capture_timeout,
        );
        self.capture.begin(cycle.boxed());
    }

    async fn on_cycle_complete(&mut self, result: CycleResult) {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Capture cycle failed: {}", e);
                self.stats.cycle_failures += 1;
                self.last_error = Some(e.to_string());
                return;
            }
        };

        match self.session.send(frame).await {
            SendOutcome::Sent => self.stats.frames_sent += 1,
            SendOutcome::Dropped => self.stats.frames_dropped += 1,
            SendOutcome::Failed => {
                self.stats.frames_dropped += 1;
                self.last_error = Some("Failed to send frame".to_string());
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected | SessionEvent::Reconnecting { .. } => {}
            SessionEvent::Disconnected { reconnect_in } | SessionEvent::Failed { reconnect_in, .. } => {
                if reconnect_in.is_none() {
                    warn!("Reconnection attempts exhausted; send 'reconnect' to try again");
                }
            }
            SessionEvent::Detections(set) => {
                self.stats.detection_sets += 1;
                self.results_text = describe(&set);
                self.overlay.replace(set);
            }
            SessionEvent::ServiceError(message) => {
                self.last_error = Some(format!("Service error: {}", message));
            }
        }
    }

    fn status_text(&self) -> String {
        match self.gate.state() {
            PermissionState::Granted if self.device.is_none() && self.device_lookup.is_none() => {
                "No camera device found".to_string()
            }
            PermissionState::Granted => format!("Server: {}", self.session.state()),
            _ => self.gate.status_text(),
        }
    }

    /// Write a snapshot if anything changed since the last one
    fn publish(&self) {
        let next = ViewState {
            permission: self.gate.state(),
            connection: self.session.state(),
            streaming: self.capture.state(),
            status_text: self.status_text(),
            results_text: self.results_text.clone(),
            last_error: self.last_error.clone(),
            regions: self.overlay.render(self.options.surface),
            stats: self.stats,
            revision: 0,
        };

        let mut state = self.state.write();
        let revision = state.revision;
        let changed = *state
            != ViewState {
                revision,
                ..next.clone()
            };
        if changed {
            *state = ViewState {
                revision: revision + 1,
                ..next
            };
        }
    }

    /// Cancel the timer, drop pending work and close the connection.
    /// Idempotent.
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.capture.stop();
        if self.capture.cancel_in_flight() {
            debug!("Dropped in-flight capture cycle");
        }
        self.gate.cancel();
        self.device_lookup = None;
        self.session.teardown().await;
        self.publish();
    }
}

/// Drive the pending device lookup. Never resolves when none is pending.
async fn next_lookup(lookup: &mut Option<DeviceLookup>) -> Result<Vec<CameraDevice>, CaptureError> {
    let Some(pending) = lookup.as_mut() else {
        return std::future::pending().await;
    };
    let devices = pending.await;
    *lookup = None;
    devices
}

/// Run `work` unless `shutdown` fires first. Returns false if it did.
async fn unless_cancelled(shutdown: &CancellationToken, work: impl Future<Output = ()>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = work => true,
    }
}

fn describe(set: &DetectionSet) -> String {
    if set.is_empty() {
        return "No objects detected".to_string();
    }
    let labels: Vec<String> = set.iter().map(format_label).collect();
    format!("{} detected: {}", set.len(), labels.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{AuthorizationStatus, StreamingState};
    use crate::testing::{MockConnector, ScriptedCamera};
    use crate::transport::{ConnectionState, DETECTIONS_EVENT, ERROR_EVENT, FRAME_EVENT};
    use serde_json::json;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout, Instant};

    struct Harness {
        state: SharedViewState,
        camera: Arc<ScriptedCamera>,
        connector: Arc<MockConnector>,
        commands: mpsc::Sender<ViewCommand>,
        shutdown: CancellationToken,
        handle: JoinHandle<()>,
    }

    impl Harness {
        fn spawn(camera: Arc<ScriptedCamera>, autostart: bool) -> Self {
            let connector = MockConnector::new();
            let options = ViewOptions {
                autostart,
                ..ViewOptions::default()
            };
            let view = InferenceView::new(options, camera.clone(), connector.clone());
            let state = view.state();
            let (commands, rx) = mpsc::channel(8);
            let shutdown = CancellationToken::new();
            let handle = tokio::spawn(view.run(rx, shutdown.clone()));

            Self {
                state,
                camera,
                connector,
                commands,
                shutdown,
                handle,
            }
        }

        async fn send(&self, command: ViewCommand) {
            self.commands.send(command).await.unwrap();
        }

        fn snapshot(&self) -> ViewState {
            self.state.read().clone()
        }

        fn frames(&self) -> usize {
            self.connector.emitted(FRAME_EVENT)
        }

        async fn stop(self) -> ViewState {
            self.shutdown.cancel();
            self.handle.await.unwrap();
            self.state.read().clone()
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_sends_one_frame() {
        let camera = ScriptedCamera::new(AuthorizationStatus::NotDetermined, AuthorizationStatus::Granted);
        let view = Harness::spawn(camera, false);

        sleep(ms(10)).await;
        let state = view.snapshot();
        assert_eq!(state.permission, PermissionState::Granted);
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.status_text, "Server: Connected");
        assert_eq!(view.camera.requests(), 1);

        view.send(ViewCommand::StartStreaming).await;
        sleep(ms(400)).await;
        assert_eq!(view.frames(), 0);
        assert!(view.snapshot().is_streaming());

        sleep(ms(200)).await;
        assert_eq!(view.frames(), 1);
        assert_eq!(view.snapshot().stats.frames_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_pauses_sending_until_reconnected() {
        let view = Harness::spawn(ScriptedCamera::granted(), true);

        sleep(ms(1200)).await;
        assert_eq!(view.frames(), 2);

        view.connector.drop_connection();
        sleep(ms(10)).await;
        assert_eq!(view.snapshot().connection, ConnectionState::Disconnected);

        sleep(ms(1500)).await;
        assert_eq!(view.frames(), 2);
        assert!(view.snapshot().stats.ticks_skipped >= 3);

        sleep(ms(1000)).await;
        let state = view.snapshot();
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(view.connector.opens(), 2);
        assert_eq!(view.frames(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detections_replace_overlay() {
        let view = Harness::spawn(ScriptedCamera::granted(), false);
        sleep(ms(10)).await;

        view.connector.deliver(
            DETECTIONS_EVENT,
            json!({"detections": [{"class": "person", "confidence": 0.92, "bbox": [10, 10, 110, 210]}]}),
        );
        sleep(ms(10)).await;

        let state = view.snapshot();
        assert_eq!(state.regions.len(), 1);
        let region = &state.regions[0];
        assert_eq!((region.x1, region.y1, region.x2, region.y2), (10.0, 10.0, 110.0, 210.0));
        assert_eq!(region.label, "person (92.0%)");
        assert_eq!(state.results_text, "1 detected: person (92.0%)");
        assert_eq!(state.stats.detection_sets, 1);

        view.connector.deliver(DETECTIONS_EVENT, json!({"detections": []}));
        sleep(ms(10)).await;
        let state = view.snapshot();
        assert!(state.regions.is_empty());
        assert_eq!(state.results_text, "No objects detected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_permission_never_captures() {
        let camera = ScriptedCamera::new(AuthorizationStatus::Denied, AuthorizationStatus::Denied);
        let view = Harness::spawn(camera, true);
        view.send(ViewCommand::StartStreaming).await;

        sleep(ms(3000)).await;
        let state = view.snapshot();
        assert_eq!(state.permission, PermissionState::Denied);
        assert_eq!(state.status_text, "Camera permission denied (Status: denied)");
        assert_eq!(view.camera.captures(), 0);
        assert_eq!(view.connector.opens(), 0);
        assert!(state.stats.ticks_skipped > 0);

        view.camera.set_request_result(AuthorizationStatus::Granted);
        view.send(ViewCommand::RetryPermission).await;
        sleep(ms(600)).await;

        let state = view.snapshot();
        assert_eq!(state.permission, PermissionState::Granted);
        assert_eq!(state.connection, ConnectionState::Connected);
        assert!(view.camera.captures() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_capture_while_disconnected() {
        let view = Harness::spawn(ScriptedCamera::granted(), true);
        view.connector.fail_next_opens(100);

        sleep(ms(3000)).await;
        let state = view.snapshot();
        assert_ne!(state.connection, ConnectionState::Connected);
        assert_eq!(view.camera.captures(), 0);
        assert_eq!(view.frames(), 0);
        assert!(state.stats.ticks_skipped >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_frame_dropped_after_disconnect() {
        let view = Harness::spawn(ScriptedCamera::granted(), true);
        view.camera.set_capture_delay(ms(300));

        sleep(ms(600)).await;
        assert_eq!(view.camera.captures(), 1);
        view.connector.drop_connection();

        sleep(ms(300)).await;
        let state = view.snapshot();
        assert_eq!(state.stats.frames_dropped, 1);
        assert_eq!(view.frames(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_ticks_are_skipped() {
        let view = Harness::spawn(ScriptedCamera::granted(), true);
        view.camera.set_capture_delay(ms(700));

        sleep(ms(1600)).await;
        let state = view.snapshot();
        assert_eq!(view.frames(), 1);
        assert_eq!(state.stats.ticks_skipped, 1);
        assert_eq!(view.camera.captures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_capture() {
        let view = Harness::spawn(ScriptedCamera::granted(), true);

        sleep(ms(600)).await;
        assert_eq!(view.frames(), 1);

        view.send(ViewCommand::StopStreaming).await;
        sleep(ms(2000)).await;
        let state = view.snapshot();
        assert_eq!(state.streaming, StreamingState::Idle);
        assert_eq!(view.frames(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_reported_not_fatal() {
        let view = Harness::spawn(ScriptedCamera::granted(), true);
        view.camera.fail_next_capture();

        sleep(ms(600)).await;
        let state = view.snapshot();
        assert_eq!(state.stats.cycle_failures, 1);
        assert!(state.last_error.is_some());

        view.connector.deliver(ERROR_EVENT, json!({"message": "Invalid image data"}));
        sleep(ms(10)).await;
        assert_eq!(
            view.snapshot().last_error.as_deref(),
            Some("Service error: Invalid image data")
        );
        assert_eq!(view.snapshot().connection, ConnectionState::Connected);

        sleep(ms(500)).await;
        assert_eq!(view.frames(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_device_skips_ticks() {
        let camera = ScriptedCamera::granted();
        camera.remove_devices();
        let view = Harness::spawn(camera, true);

        sleep(ms(1100)).await;
        let state = view.snapshot();
        assert_eq!(state.status_text, "No camera device found");
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.stats.ticks_skipped, 2);
        assert_eq!(view.camera.captures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_connection_once() {
        let view = Harness::spawn(ScriptedCamera::granted(), true);
        sleep(ms(10)).await;
        assert!(view.snapshot().is_streaming());

        let camera = view.camera.clone();
        let connector = view.connector.clone();
        let state = view.stop().await;

        assert_eq!(connector.closes(), 1);
        assert_eq!(state.streaming, StreamingState::Idle);
        assert_eq!(state.connection, ConnectionState::Disconnected);

        sleep(ms(2000)).await;
        assert_eq!(camera.captures(), 0);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_permission_decision_is_ignored() {
        let camera = ScriptedCamera::granted();
        camera.set_permission_delay(Duration::from_secs(1));
        let view = Harness::spawn(camera, true);
        sleep(ms(100)).await;

        let connector = view.connector.clone();
        let state = view.stop().await;
        assert_eq!(state.permission, PermissionState::Unknown);

        sleep(ms(3000)).await;
        assert_eq!(connector.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_command() {
        let view = Harness::spawn(ScriptedCamera::granted(), false);
        sleep(ms(10)).await;
        view.send(ViewCommand::Shutdown).await;
        view.handle.await.unwrap();
        assert_eq!(view.connector.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_does_not_block_shutdown() {
        let view = Harness::spawn(ScriptedCamera::granted(), true);
        view.connector.set_emit_delay(Duration::from_secs(3600));

        sleep(ms(600)).await;
        assert_eq!(view.camera.captures(), 1);

        let connector = view.connector.clone();
        let stopping = Instant::now();
        let state = timeout(Duration::from_secs(60), view.stop())
            .await
            .expect("view did not shut down");
        assert!(stopping.elapsed() < Duration::from_secs(1));
        assert_eq!(state.connection, ConnectionState::Disconnected);
        assert_eq!(connector.emitted(FRAME_EVENT), 0);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_is_abandoned() {
        let view = Harness::spawn(ScriptedCamera::granted(), true);
        view.connector.set_emit_delay(Duration::from_secs(3600));

        sleep(ms(6000)).await;
        let state = view.snapshot();
        assert!(state.stats.frames_dropped >= 1);
        assert_eq!(state.last_error.as_deref(), Some("Failed to send frame"));
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(view.frames(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_listing_does_not_block_commands() {
        let camera = ScriptedCamera::granted();
        camera.set_list_delay(Duration::from_secs(1));
        let view = Harness::spawn(camera, false);

        sleep(ms(10)).await;
        view.send(ViewCommand::StartStreaming).await;
        sleep(ms(10)).await;
        let state = view.snapshot();
        assert!(state.is_streaming());
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.status_text, "Server: Connected");

        sleep(ms(1600)).await;
        let state = view.snapshot();
        assert!(state.stats.ticks_skipped >= 1);
        assert!(view.frames() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_listing_times_out() {
        let camera = ScriptedCamera::granted();
        camera.set_list_delay(Duration::from_secs(3600));
        let view = Harness::spawn(camera, true);

        sleep(ms(2500)).await;
        let state = view.snapshot();
        assert_eq!(state.status_text, "No camera device found");
        assert_eq!(state.last_error.as_deref(), Some("no camera device available"));
        assert_eq!(view.camera.captures(), 0);
    }
}
