//! Scripted stand-ins for the camera and the inference connection

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::capture::frame::CapturedFrame;
use crate::capture::{AuthorizationStatus, Camera, CameraDevice, CameraPosition};
use crate::error::{CaptureError, ConnectionError, PermissionError, SendError};
use crate::transport::{Connector, Inbound, Link, LinkFuture};
use crate::vision::encoder::{to_data_uri, EncodedFrame};

/// Raw frame filled with a single color
pub fn solid_frame(width: u32, height: u32) -> CapturedFrame {
    CapturedFrame::from_rgba_image(RgbaImage::from_pixel(width, height, Rgba([40, 120, 200, 255])))
}

/// Small valid payload
pub fn encoded_frame() -> EncodedFrame {
    EncodedFrame::parse(to_data_uri(vec![0xff, 0xd8, 0xff, 0xd9])).unwrap()
}

struct CameraScript {
    status: AuthorizationStatus,
    request_result: AuthorizationStatus,
    fail_query: bool,
    permission_delay: Duration,
    devices: Vec<CameraDevice>,
    list_delay: Duration,
    capture_delay: Duration,
    fail_next_capture: bool,
}

/// Camera whose permission answers and captures are set by the test
pub struct ScriptedCamera {
    script: Mutex<CameraScript>,
    requests: AtomicUsize,
    captures: AtomicUsize,
}

impl ScriptedCamera {
    pub fn new(status: AuthorizationStatus, request_result: AuthorizationStatus) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(CameraScript {
                status,
                request_result,
                fail_query: false,
                permission_delay: Duration::ZERO,
                devices: vec![Self::back_camera()],
                list_delay: Duration::ZERO,
                capture_delay: Duration::ZERO,
                fail_next_capture: false,
            }),
            requests: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
        })
    }

    pub fn granted() -> Arc<Self> {
        Self::new(AuthorizationStatus::Granted, AuthorizationStatus::Granted)
    }

    fn back_camera() -> CameraDevice {
        CameraDevice {
            id: "scripted-back".to_string(),
            position: CameraPosition::Back,
        }
    }

    pub fn device(&self) -> CameraDevice {
        Self::back_camera()
    }

    pub fn set_request_result(&self, status: AuthorizationStatus) {
        self.script.lock().request_result = status;
    }

    pub fn fail_permission_query(&self) {
        self.script.lock().fail_query = true;
    }

    pub fn set_permission_delay(&self, delay: Duration) {
        self.script.lock().permission_delay = delay;
    }

    pub fn remove_devices(&self) {
        self.script.lock().devices.clear();
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.script.lock().list_delay = delay;
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        self.script.lock().capture_delay = delay;
    }

    pub fn fail_next_capture(&self) {
        self.script.lock().fail_next_capture = true;
    }

    /// Permission prompts shown so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Captures attempted so far
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for ScriptedCamera {
    async fn list_devices(&self) -> Result<Vec<CameraDevice>, CaptureError> {
        let (delay, devices) = {
            let script = self.script.lock();
            (script.list_delay, script.devices.clone())
        };
        tokio::time::sleep(delay).await;
        Ok(devices)
    }

    async fn permission_status(&self) -> Result<AuthorizationStatus, PermissionError> {
        let (delay, fail, status) = {
            let script = self.script.lock();
            (script.permission_delay, script.fail_query, script.status)
        };
        tokio::time::sleep(delay).await;
        if fail {
            return Err(PermissionError::Query("scripted failure".to_string()));
        }
        Ok(status)
    }

    async fn request_permission(&self) -> Result<AuthorizationStatus, PermissionError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = {
            let script = self.script.lock();
            (script.permission_delay, script.request_result)
        };
        tokio::time::sleep(delay).await;
        Ok(result)
    }

    async fn capture(&self, _device: &CameraDevice) -> Result<CapturedFrame, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let (delay, fail) = {
            let mut script = self.script.lock();
            (script.capture_delay, std::mem::take(&mut script.fail_next_capture))
        };
        tokio::time::sleep(delay).await;
        if fail {
            return Err(CaptureError::Device("scripted failure".to_string()));
        }
        Ok(solid_frame(64, 48))
    }
}

enum LinkMessage {
    Event(Inbound),
    Error(ConnectionError),
    Close,
}

#[derive(Debug, Clone, Copy, Default)]
struct LinkTiming {
    emit: Duration,
    close: Duration,
}

#[derive(Default)]
struct ConnectorScript {
    fail_opens: u32,
    open_delay: Duration,
    peer: Option<mpsc::UnboundedSender<LinkMessage>>,
}

/// Connector handing out in-memory links the test can drive from the
/// service side
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<ConnectorScript>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    emitted: Arc<Mutex<Vec<(String, Value)>>>,
    timing: Arc<Mutex<LinkTiming>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_opens(&self, count: u32) {
        self.script.lock().fail_opens = count;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.script.lock().open_delay = delay;
    }

    /// Every emit on every link stalls for `delay` before being recorded
    pub fn set_emit_delay(&self, delay: Duration) {
        self.timing.lock().emit = delay;
    }

    /// Every close on every link takes `delay` before it is counted
    pub fn set_close_delay(&self, delay: Duration) {
        self.timing.lock().close = delay;
    }

    /// Push an inbound event onto the most recent link
    pub fn deliver(&self, event: &str, payload: Value) {
        self.push(LinkMessage::Event(Inbound {
            event: event.to_string(),
            payload,
        }));
    }

    /// Service closes the most recent link
    pub fn drop_connection(&self) {
        self.push(LinkMessage::Close);
    }

    /// Most recent link breaks with `error`
    pub fn fail_connection(&self, error: ConnectionError) {
        self.push(LinkMessage::Error(error));
    }

    fn push(&self, message: LinkMessage) {
        if let Some(peer) = self.script.lock().peer.as_ref() {
            let _ = peer.send(message);
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of `event` emissions across all links
    pub fn emitted(&self, event: &str) -> usize {
        self.emitted.lock().iter().filter(|(name, _)| name == event).count()
    }
}

impl Connector for MockConnector {
    fn open(&self, _address: &str) -> LinkFuture {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();

        if script.fail_opens > 0 {
            script.fail_opens -= 1;
            return Box::pin(async {
                Err(ConnectionError::Connect {
                    url: "mock".to_string(),
                    reason: "connection refused".to_string(),
                })
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        script.peer = Some(tx);
        let delay = script.open_delay;
        let link = MockLink {
            inbound: rx,
            closes: self.closes.clone(),
            emitted: self.emitted.clone(),
            timing: self.timing.clone(),
        };
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(Box::new(link) as Box<dyn Link>)
        })
    }
}

struct MockLink {
    inbound: mpsc::UnboundedReceiver<LinkMessage>,
    closes: Arc<AtomicUsize>,
    emitted: Arc<Mutex<Vec<(String, Value)>>>,
    timing: Arc<Mutex<LinkTiming>>,
}

#[async_trait]
impl Link for MockLink {
    async fn emit(&mut self, event: &str, payload: Value) -> Result<(), SendError> {
        let delay = self.timing.lock().emit;
        tokio::time::sleep(delay).await;
        self.emitted.lock().push((event.to_string(), payload));
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Inbound, ConnectionError>> {
        match self.inbound.recv().await? {
            LinkMessage::Event(inbound) => Some(Ok(inbound)),
            LinkMessage::Error(error) => Some(Err(error)),
            LinkMessage::Close => None,
        }
    }

    async fn close(&mut self) {
        let delay = self.timing.lock().close;
        tokio::time::sleep(delay).await;
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
