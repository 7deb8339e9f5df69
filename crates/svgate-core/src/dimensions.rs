//! Logical size of an SVG root in user-space units.

use crate::markup::{RootAttributes, root_attributes};

pub const DEFAULT_WIDTH: f64 = 800.0;
pub const DEFAULT_HEIGHT: f64 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl Dimensions {
    fn positive(width: f64, height: f64) -> Option<Self> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        (ok(width) && ok(height)).then_some(Self { width, height })
    }
}

/// Resolves the size of the root `<svg>` in `markup`.
///
/// Priority: `viewBox` width/height, then explicit `width`/`height`, then 800×600. Any field
/// that is missing or not a positive number falls through to the next rule.
pub fn resolve_dimensions(markup: &str) -> Dimensions {
    root_attributes(markup)
        .map(|attrs| dimensions_from_attributes(&attrs))
        .unwrap_or_default()
}

pub fn dimensions_from_attributes(attrs: &RootAttributes) -> Dimensions {
    if let Some(dims) = attrs.get("viewBox").and_then(parse_view_box) {
        return dims;
    }

    let width = attrs.get("width").and_then(parse_length);
    let height = attrs.get("height").and_then(parse_length);
    if let (Some(width), Some(height)) = (width, height) {
        if let Some(dims) = Dimensions::positive(width, height) {
            return dims;
        }
    }

    Dimensions::default()
}

/// `minX minY width height`, separated by whitespace and/or commas.
fn parse_view_box(raw: &str) -> Option<Dimensions> {
    let fields: Vec<&str> = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|f| !f.is_empty())
        .collect();
    let [min_x, min_y, width, height] = fields.as_slice() else {
        return None;
    };
    // The offsets are not used, but a box with garbage in them is not a box.
    min_x.parse::<f64>().ok()?;
    min_y.parse::<f64>().ok()?;
    Dimensions::positive(width.parse().ok()?, height.parse().ok()?)
}

/// A unitless number or a `px` length. Percentages and other units describe a responsive
/// layout rather than a size and are rejected.
fn parse_length(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let number = raw.strip_suffix("px").unwrap_or(raw).trim_end();
    number.parse::<f64>().ok()
}
