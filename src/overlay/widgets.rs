//! Region styles for detection overlays

/// How a single detection region is drawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStyle {
    /// Box outline color (RGBA)
    pub stroke: [f32; 4],
    /// Box outline width
    pub stroke_width: f32,
}

impl Default for RegionStyle {
    fn default() -> Self {
        Self {
            stroke: [0.0, 1.0, 0.0, 1.0],
            stroke_width: 2.0,
        }
    }
}

impl RegionStyle {
    /// Outline color as `#rrggbb`
    pub fn hex(&self) -> String {
        let [r, g, b, _] = self.stroke.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }
}

const PALETTE: [[f32; 4]; 8] = [
    [0.0, 1.0, 0.0, 1.0],
    [1.0, 0.6, 0.0, 1.0],
    [0.2, 0.6, 1.0, 1.0],
    [1.0, 0.2, 0.4, 1.0],
    [0.8, 0.4, 1.0, 1.0],
    [1.0, 1.0, 0.2, 1.0],
    [0.0, 0.9, 0.9, 1.0],
    [1.0, 0.5, 0.8, 1.0],
];

/// Stable per-class style: the same label always gets the same color
pub fn style_for_class(label: &str) -> RegionStyle {
    // FNV-1a, independent of process-random hasher seeds
    let hash = label.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    });
    RegionStyle {
        stroke: PALETTE[(hash % PALETTE.len() as u64) as usize],
        ..Default::default()
    }
}
