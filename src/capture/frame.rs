//! Raw still images handed over by the camera

use image::RgbaImage;
use std::time::Instant;

use crate::error::EncodingError;

/// A still captured from the camera, before any resizing or compression
#[derive(Debug)]
pub struct CapturedFrame {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Wrap an already decoded image
    pub fn from_rgba_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Consume the frame into an image buffer, validating the pixel count.
    pub fn into_rgba_image(self) -> Result<RgbaImage, EncodingError> {
        let (width, height) = (self.width, self.height);
        if width == 0 || height == 0 {
            return Err(EncodingError::InvalidFrame { width, height });
        }
        RgbaImage::from_raw(width, height, self.data)
            .ok_or(EncodingError::InvalidFrame { width, height })
    }
}
