//! Geometry and document-shape primitives shared by the probe decoders.
//!
//! In-page probes decode into typed structures built from these primitives
//! before any heuristic looks at them, so the scoring functions stay pure and
//! testable against hand-built fixtures instead of a live browser.

use serde::{Deserialize, Serialize};

/// Bounding box in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn top_right(&self) -> (f64, f64) {
        (self.x + self.width, self.y)
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }

    /// Distance from this rect's center to another rect's top-right corner.
    pub fn distance_to_top_right(&self, other: &Rect) -> f64 {
        let (cx, cy) = self.center();
        let (tx, ty) = other.top_right();
        ((cx - tx).powi(2) + (cy - ty).powi(2)).sqrt()
    }
}

/// CSS `position` value as reported by a computed-style probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CssPosition {
    #[default]
    Static,
    Relative,
    Absolute,
    Fixed,
    Sticky,
}

impl CssPosition {
    /// Whether the element is taken out of normal flow and can sit on top of
    /// other content.
    pub fn overlays(self) -> bool {
        matches!(self, CssPosition::Absolute | CssPosition::Fixed)
    }
}

/// One input surfaced by the page-structure inspection probe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputProbe {
    pub tag: String,
    pub input_type: String,
    pub name: String,
    pub id: String,
    pub placeholder: String,
    pub class_name: String,
}

/// One button/link surfaced by the page-structure inspection probe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ButtonProbe {
    pub tag: String,
    pub text: String,
    pub id: String,
    pub class_name: String,
}

/// Catalogue of plausible search controls on the current page, used to keep
/// locator tables honest when the target markup drifts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InspectReport {
    pub search_inputs: Vec<InputProbe>,
    pub search_buttons: Vec<ButtonProbe>,
}
