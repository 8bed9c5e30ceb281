//! Vision Layer
//!
//! Detection results produced by the remote inference service, and the
//! encoder that turns camera stills into payloads the service accepts.

pub mod encoder;

use serde::{Deserialize, Serialize};

pub use encoder::{capture_cycle, EncodedFrame, EncoderConfig, FrameEncoder};

/// Axis-aligned box as `[x1, y1, x2, y2]` in encoded-frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Same box with corners ordered so that (x1, y1) is top-left
    pub fn normalized(&self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    fn is_finite(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite())
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// A single detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label reported by the model
    #[serde(rename = "class")]
    pub label: String,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    /// Region in encoded-frame coordinates
    pub bbox: BoundingBox,
}

/// Every detection from one inference response, in service order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSet {
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    /// Parse the payload of an inbound `detections` event.
    ///
    /// Entries with non-finite coordinates are dropped and confidences are
    /// clamped into [0, 1].
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut set: DetectionSet = serde_json::from_value(payload)?;
        set.detections.retain(|d| d.bbox.is_finite() && d.confidence.is_finite());
        for detection in &mut set.detections {
            detection.confidence = detection.confidence.clamp(0.0, 1.0);
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }
}
