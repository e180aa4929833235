// THEORY:
// A `Section` is the configuration-side identity of one monitored shelf area: a unique name
// plus the geometry that tells the engine which pixels of a full video frame belong to it.
// Sections are created and destroyed by the surrounding application (UI or config file);
// the engine only references them by name and keeps its own runtime state beside them.
//
// Geometry comes in two shapes because shelves are rarely filmed head-on:
// - `Rect`: an axis-aligned box, the common case for a fixed overhead camera.
// - `Quad`: four arbitrary corners. The region is perspective-corrected into an upright
//   rectangle so every extractor sees a "flattened" shelf face.

use crate::config::{clamp_sensitivity, clamp_threshold};
use serde::{Deserialize, Serialize};

/// A corner position in frame-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FramePoint {
    pub x: f32,
    pub y: f32,
}

impl FramePoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &FramePoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Where a section lives inside the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionGeometry {
    /// Axis-aligned rectangle; (x, y) is the top-left corner.
    Rect { x: u32, y: u32, width: u32, height: u32 },
    /// Corners in order: top-left, top-right, bottom-right, bottom-left.
    Quad { corners: [FramePoint; 4] },
}

impl SectionGeometry {
    /// Size of the region this geometry describes, before it is bounded by the frame.
    pub fn output_size(&self) -> (u32, u32) {
        match self {
            SectionGeometry::Rect { width, height, .. } => (*width, *height),
            SectionGeometry::Quad { corners } => {
                let [top_left, top_right, bottom_right, bottom_left] = corners;
                let width = top_left
                    .distance(top_right)
                    .max(bottom_left.distance(bottom_right));
                let height = top_left
                    .distance(bottom_left)
                    .max(top_right.distance(bottom_right));
                (width.round() as u32, height.round() as u32)
            }
        }
    }

    /// Signed-area magnitude of the outline (shoelace).
    pub fn area(&self) -> f32 {
        match self {
            SectionGeometry::Rect { width, height, .. } => (*width as f32) * (*height as f32),
            SectionGeometry::Quad { corners } => {
                let mut twice_area = 0.0f32;
                for i in 0..4 {
                    let a = corners[i];
                    let b = corners[(i + 1) % 4];
                    twice_area += a.x * b.y - b.x * a.y;
                }
                twice_area.abs() * 0.5
            }
        }
    }
}

/// A named monitored area of the video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Unique key used in every analysis call.
    pub name: String,
    pub geometry: SectionGeometry,
    /// Per-section override of the engine sensitivity (0.1-1.0).
    #[serde(default)]
    pub sensitivity: Option<f64>,
    /// Per-section override of the alert confidence threshold.
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl Section {
    pub fn new(name: impl Into<String>, geometry: SectionGeometry) -> Self {
        Self {
            name: name.into(),
            geometry,
            sensitivity: None,
            threshold: None,
        }
    }

    pub fn rect(name: impl Into<String>, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::new(name, SectionGeometry::Rect { x, y, width, height })
    }

    pub fn with_sensitivity(mut self, sensitivity: f64) -> Self {
        self.sensitivity = Some(sensitivity);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Clamps the per-section overrides into the same ranges as their global settings.
    pub fn sanitize_overrides(&mut self) {
        self.sensitivity = self.sensitivity.map(clamp_sensitivity);
        self.threshold = self.threshold.map(clamp_threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_output_size_uses_longest_opposite_edges() {
        let geometry = SectionGeometry::Quad {
            corners: [
                FramePoint::new(10.0, 10.0),
                FramePoint::new(110.0, 20.0),
                FramePoint::new(110.0, 80.0),
                FramePoint::new(10.0, 90.0),
            ],
        };
        let (width, height) = geometry.output_size();
        assert_eq!(width, 100);
        assert_eq!(height, 80);
        assert!(geometry.area() > 6000.0);
    }

    #[test]
    fn collapsed_quad_has_no_area() {
        let p = FramePoint::new(5.0, 5.0);
        let geometry = SectionGeometry::Quad { corners: [p, p, p, p] };
        assert_eq!(geometry.area(), 0.0);
    }
}
