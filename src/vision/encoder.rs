//! Frame Encoder
//!
//! Reduces a raw camera still to a bounded-size payload:
//! resize to the target resolution, JPEG-compress at a fixed quality,
//! base64-encode and wrap as a data URI. Each stage consumes the previous
//! stage's buffer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::capture::frame::CapturedFrame;
use crate::capture::{Camera, CameraDevice};
use crate::error::{CaptureError, CycleError, EncodingError};

/// Format marker every outbound payload starts with
pub const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Fixed encoder parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    /// JPEG quality (1 - 100)
    pub quality: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            quality: 70,
        }
    }
}

/// A validated `data:image/jpeg;base64,...` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame(String);

impl EncodedFrame {
    /// Accept `payload` only if it carries the JPEG marker and a body
    pub fn parse(payload: String) -> Result<Self, EncodingError> {
        if payload.is_empty() {
            return Err(EncodingError::Empty);
        }
        match payload.strip_prefix(JPEG_DATA_URI_PREFIX) {
            Some(body) if !body.is_empty() => Ok(Self(payload)),
            Some(_) => Err(EncodingError::Empty),
            None => Err(EncodingError::MissingMarker(JPEG_DATA_URI_PREFIX)),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Resize + compress + encode pipeline
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    config: EncoderConfig,
}

impl FrameEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Resolution detections are reported in
    pub fn frame_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Stretch to exactly the target size.
    ///
    /// Both axes are scaled independently so bounding boxes returned by the
    /// service always live in `frame_size()` coordinates.
    pub fn resize(&self, frame: CapturedFrame) -> Result<RgbImage, EncodingError> {
        let rgba = frame.into_rgba_image()?;
        let (width, height) = self.frame_size();
        let resized = if rgba.dimensions() == (width, height) {
            rgba
        } else {
            imageops::resize(&rgba, width, height, FilterType::Triangle)
        };
        Ok(DynamicImage::ImageRgba8(resized).to_rgb8())
    }

    /// JPEG-compress at the configured quality
    pub fn compress(&self, image: RgbImage) -> Result<Vec<u8>, EncodingError> {
        let mut buffer = Vec::with_capacity(jpeg_capacity(image.width(), image.height()));
        let quality = self.config.quality.clamp(1, 100);
        JpegEncoder::new_with_quality(&mut buffer, quality)
            .encode_image(&image)
            .map_err(|e| EncodingError::Compress(e.to_string()))?;
        Ok(buffer)
    }

    /// Run every stage and validate the result
    pub fn encode(&self, frame: CapturedFrame) -> Result<EncodedFrame, EncodingError> {
        let source = frame.dimensions();
        let captured_at = frame.timestamp;
        let resized = self.resize(frame)?;
        let jpeg = self.compress(resized)?;
        let jpeg_len = jpeg.len();
        let encoded = EncodedFrame::parse(to_data_uri(jpeg))?;
        debug!(
            "Encoded {}x{} frame: {} JPEG bytes, {} payload bytes ({:?} after capture)",
            source.0,
            source.1,
            jpeg_len,
            encoded.len(),
            captured_at.elapsed()
        );
        Ok(encoded)
    }
}

/// Initial JPEG buffer size: roughly one byte per eight pixels
fn jpeg_capacity(width: u32, height: u32) -> usize {
    (width as usize).saturating_mul(height as usize) / 8
}

/// Base64-encode JPEG bytes and prepend the data URI marker
pub fn to_data_uri(jpeg: Vec<u8>) -> String {
    let mut uri = String::with_capacity(JPEG_DATA_URI_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    uri.push_str(JPEG_DATA_URI_PREFIX);
    STANDARD.encode_string(&jpeg, &mut uri);
    uri
}

/// Body of one capture cycle: capture a still, then encode it.
///
/// Sending is left to the caller, which must re-check the connection first.
pub async fn capture_cycle(
    camera: Arc<dyn Camera>,
    device: CameraDevice,
    encoder: Arc<FrameEncoder>,
    capture_timeout: Duration,
) -> Result<EncodedFrame, CycleError> {
    let frame = tokio::time::timeout(capture_timeout, camera.capture(&device))
        .await
        .map_err(|_| CaptureError::Timeout(capture_timeout))??;
    Ok(encoder.encode(frame)?)
}
