//! Detection Overlay Model
//!
//! Holds the most recent detection set and maps it onto the live camera
//! surface. Each new set replaces the previous one outright; nothing is
//! merged or smoothed.

pub mod widgets;

use std::fmt;

use crate::overlay::widgets::{style_for_class, RegionStyle};
use crate::vision::{Detection, DetectionSet};

/// Pixel dimensions of the surface the camera feed is displayed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// One annotated rectangle in surface coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayRegion {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub label: String,
    pub style: RegionStyle,
}

impl OverlayRegion {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

impl fmt::Display for OverlayRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at ({:.0},{:.0})-({:.0},{:.0}) {} {}px",
            self.label,
            self.x1,
            self.y1,
            self.x2,
            self.y2,
            self.style.hex(),
            self.style.stroke_width
        )
    }
}

/// `<class> (<confidence>%)` with one decimal
pub fn format_label(detection: &Detection) -> String {
    format!("{} ({:.1}%)", detection.label, detection.confidence * 100.0)
}

/// Latest detection set plus the resolution its boxes are expressed in
#[derive(Debug, Clone)]
pub struct DetectionOverlay {
    frame_size: (u32, u32),
    current: DetectionSet,
}

impl DetectionOverlay {
    /// `frame_size` is the encoded frame resolution sent to the service
    pub fn new(frame_size: (u32, u32)) -> Self {
        Self {
            frame_size,
            current: DetectionSet::default(),
        }
    }

    /// Swap in a new set. An empty set clears every overlay.
    pub fn replace(&mut self, set: DetectionSet) {
        self.current = set;
    }

    /// Map the current set onto `surface`.
    ///
    /// Pure: rendering the same set onto the same surface always yields the
    /// same regions. Boxes are normalized, scaled per axis, clamped to the
    /// surface, and dropped if nothing of them remains visible.
    pub fn render(&self, surface: SurfaceSize) -> Vec<OverlayRegion> {
        let (frame_w, frame_h) = self.frame_size;
        let scale = |surface_len: u32, frame_len: u32| {
            if frame_len == 0 || surface_len == frame_len {
                1.0
            } else {
                surface_len as f32 / frame_len as f32
            }
        };
        let sx = scale(surface.width, frame_w);
        let sy = scale(surface.height, frame_h);
        let max_x = surface.width as f32;
        let max_y = surface.height as f32;

        self.current
            .iter()
            .filter_map(|detection| {
                let b = detection.bbox.normalized();
                let region = OverlayRegion {
                    x1: (b.x1 * sx).clamp(0.0, max_x),
                    y1: (b.y1 * sy).clamp(0.0, max_y),
                    x2: (b.x2 * sx).clamp(0.0, max_x),
                    y2: (b.y2 * sy).clamp(0.0, max_y),
                    label: format_label(detection),
                    style: style_for_class(&detection.label),
                };
                (region.width() > 0.0 && region.height() > 0.0).then_some(region)
            })
            .collect()
    }
}

/// One printable line per region
pub fn render_lines(regions: &[OverlayRegion]) -> Vec<String> {
    regions.iter().map(|region| region.to_string()).collect()
}
