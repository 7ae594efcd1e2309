//! Pixel-space overlay geometry.
//!
//! All coordinates are image pixels: x grows to the right along a row, y grows
//! downward with the row index. Conversions to physical units live in
//! [`crate::calibration`].

use serde::{Deserialize, Serialize};

use crate::device::AttributeValue;
use crate::error::{AppResult, ViewerError};

/// A point (or size) in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// Column coordinate
    pub x: f64,
    /// Row coordinate
    pub y: f64,
}

impl Point {
    /// Create a point
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both components finite
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Width and height of the current frame, used to clamp write-backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBounds {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl FrameBounds {
    /// Create bounds
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Clamp an axis-aligned span `[start, start + len]` into `[0, limit]`.
///
/// The span keeps its length when it fits and is shifted back inside;
/// otherwise it is shrunk to the limit. Inputs are rounded to whole pixels
/// first.
fn clamp_span(start: f64, len: f64, limit: Option<u32>) -> (i64, i64) {
    let start = finite_or_zero(start).round() as i64;
    let len = finite_or_zero(len).round().max(0.0) as i64;
    match limit {
        Some(limit) => {
            let limit = i64::from(limit);
            let len = len.min(limit);
            let start = start.clamp(0, limit - len);
            (start, len)
        }
        None => (start.max(0), len),
    }
}

fn clamp_coordinate(value: f64, limit: Option<u32>) -> i64 {
    let value = finite_or_zero(value).round() as i64;
    match limit {
        Some(limit) => value.clamp(0, i64::from(limit)),
        None => value.max(0),
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

// =============================================================================
// Region
// =============================================================================

/// Region of interest `{xmin, xmax, ymin, ymax}`.
///
/// Always normalised so `xmin <= xmax` and `ymin <= ymax`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Left edge
    pub xmin: f64,
    /// Right edge
    pub xmax: f64,
    /// Top edge
    pub ymin: f64,
    /// Bottom edge
    pub ymax: f64,
}

impl Default for Region {
    fn default() -> Self {
        Self::new(20.0, 40.0, 20.0, 40.0)
    }
}

impl Region {
    /// Create a region from its edges, swapping reversed edges.
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Self {
        Self {
            xmin: xmin.min(xmax),
            xmax: xmin.max(xmax),
            ymin: ymin.min(ymax),
            ymax: ymin.max(ymax),
        }
    }

    /// Create a region from a top-left position and a size (negative sizes flip).
    pub fn from_rect(pos: Point, size: Point) -> Self {
        Self::new(pos.x, pos.x + size.x, pos.y, pos.y + size.y)
    }

    /// Top-left corner
    pub fn pos(&self) -> Point {
        Point::new(self.xmin, self.ymin)
    }

    /// Width and height
    pub fn size(&self) -> Point {
        Point::new(self.xmax - self.xmin, self.ymax - self.ymin)
    }

    /// Width
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    /// Height
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Scale about the image origin, as when the sensor binning changes.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(
            self.xmin * factor,
            self.xmax * factor,
            self.ymin * factor,
            self.ymax * factor,
        )
    }

    /// Round to whole pixels and keep the rectangle inside the frame.
    pub fn clamped(&self, bounds: Option<FrameBounds>) -> Self {
        let (x, w) = clamp_span(self.xmin, self.width(), bounds.map(|b| b.width));
        let (y, h) = clamp_span(self.ymin, self.height(), bounds.map(|b| b.height));
        Self::new(x as f64, (x + w) as f64, y as f64, (y + h) as f64)
    }

    /// Wire form `[xmin, xmax, ymin, ymax]` as integers.
    pub fn to_wire(&self) -> Vec<i64> {
        vec![
            self.xmin.round() as i64,
            self.xmax.round() as i64,
            self.ymin.round() as i64,
            self.ymax.round() as i64,
        ]
    }

    /// Parse the wire form pushed by the device.
    pub fn from_attribute(attribute: &str, value: &AttributeValue) -> AppResult<Self> {
        let values = value
            .as_f64_vec()
            .ok_or_else(|| ViewerError::malformed(attribute, "expected a numeric array"))?;
        match values.as_slice() {
            [xmin, xmax, ymin, ymax] => Ok(Self::new(*xmin, *xmax, *ymin, *ymax)),
            other => Err(ViewerError::malformed(
                attribute,
                format!("expected 4 values, got {}", other.len()),
            )),
        }
    }

    /// Status text shown next to the ROI controls.
    pub fn label(&self) -> String {
        format!(
            "x: {}, y: {}, w: {}, h: {}",
            self.xmin.round() as i64,
            self.ymin.round() as i64,
            self.width().round() as i64,
            self.height().round() as i64
        )
    }
}

// =============================================================================
// Crosshair
// =============================================================================

/// Which crosshair line a position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineAxis {
    /// Vertical line, positioned by x
    Vertical,
    /// Horizontal line, positioned by y
    Horizontal,
}

/// Position of one crosshair line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrosshairPosition {
    /// Which line this is
    pub axis: LineAxis,
    /// Column position
    pub x: f64,
    /// Row position
    pub y: f64,
}

impl CrosshairPosition {
    /// Line at the given point
    pub fn new(axis: LineAxis, x: f64, y: f64) -> Self {
        Self { axis, x, y }
    }

    /// The coordinate that actually positions the line.
    pub fn value(&self) -> f64 {
        match self.axis {
            LineAxis::Vertical => self.x,
            LineAxis::Horizontal => self.y,
        }
    }

    /// Move the line along its free coordinate.
    pub fn with_value(mut self, value: f64) -> Self {
        match self.axis {
            LineAxis::Vertical => self.x = value,
            LineAxis::Horizontal => self.y = value,
        }
        self
    }

    /// Round and clamp the positioning coordinate into the frame.
    pub fn clamped(&self, bounds: Option<FrameBounds>) -> Self {
        let limit = bounds.map(|b| match self.axis {
            LineAxis::Vertical => b.width,
            LineAxis::Horizontal => b.height,
        });
        self.with_value(clamp_coordinate(self.value(), limit) as f64)
    }
}

// =============================================================================
// Calibration ruler
// =============================================================================

/// Calibration ruler rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RulerGeometry {
    /// Rotation in degrees (always written as 0)
    #[serde(default)]
    pub angle: f64,
    /// Top-left corner
    #[serde(with = "point_pair")]
    pub pos: Point,
    /// Width and height
    #[serde(with = "point_pair")]
    pub size: Point,
}

impl Default for RulerGeometry {
    fn default() -> Self {
        Self::new(Point::new(0.0, 0.0), Point::new(100.0, 100.0))
    }
}

impl RulerGeometry {
    /// Axis-aligned ruler
    pub fn new(pos: Point, size: Point) -> Self {
        Self {
            angle: 0.0,
            pos,
            size,
        }
    }

    /// Centre of the rectangle
    pub fn center(&self) -> Point {
        Point::new(
            self.pos.x + self.size.x / 2.0,
            self.pos.y + self.size.y / 2.0,
        )
    }

    /// Usable as a calibration reference: finite with positive area.
    pub fn is_valid(&self) -> bool {
        self.pos.is_finite() && self.size.is_finite() && self.size.x > 0.0 && self.size.y > 0.0
    }

    /// Round and keep the rectangle inside the frame.
    pub fn clamped(&self, bounds: Option<FrameBounds>) -> Self {
        let (x, w) = clamp_span(self.pos.x, self.size.x, bounds.map(|b| b.width));
        let (y, h) = clamp_span(self.pos.y, self.size.y, bounds.map(|b| b.height));
        Self::new(Point::new(x as f64, y as f64), Point::new(w as f64, h as f64))
    }

    /// JSON text written to the device.
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(&Self {
            angle: 0.0,
            ..*self
        })?)
    }

    /// Parse the JSON text pushed by the device.
    pub fn from_attribute(attribute: &str, value: &AttributeValue) -> AppResult<Self> {
        let text = value
            .as_text()
            .ok_or_else(|| ViewerError::malformed(attribute, "expected JSON text"))?;
        serde_json::from_str(text).map_err(|e| ViewerError::malformed(attribute, e.to_string()))
    }
}

/// `Point` as a two-element JSON array.
mod point_pair {
    use super::Point;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(point: &Point, serializer: S) -> Result<S::Ok, S::Error> {
        [point.x, point.y].serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Point, D::Error> {
        let [x, y] = <[f64; 2]>::deserialize(deserializer)?;
        Ok(Point::new(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_normalises_edges() {
        let region = Region::new(40.0, 20.0, 30.0, 10.0);
        assert_eq!(region, Region::new(20.0, 40.0, 10.0, 30.0));
        assert_eq!(region.size(), Point::new(20.0, 20.0));
    }

    #[test]
    fn clamp_pulls_dragged_roi_back_into_frame() {
        let dragged = Region::from_rect(Point::new(-5.2, 610.7), Point::new(50.0, 50.0));
        let written = dragged.clamped(Some(FrameBounds::new(640, 512)));
        assert_eq!(written, Region::new(0.0, 50.0, 462.0, 512.0));
        assert_eq!(written.to_wire(), vec![0, 50, 462, 512]);
    }

    #[test]
    fn clamp_shrinks_oversized_roi() {
        let huge = Region::new(-10.0, 1000.0, 3.4, 9.6);
        let written = huge.clamped(Some(FrameBounds::new(640, 512)));
        assert_eq!(written, Region::new(0.0, 640.0, 3.0, 9.0));
    }

    #[test]
    fn clamp_without_bounds_only_rejects_negative() {
        let region = Region::new(-3.0, 7.0, 5.0, 9.0).clamped(None);
        assert_eq!(region, Region::new(0.0, 10.0, 5.0, 9.0));
    }

    #[test]
    fn region_from_attribute() {
        let value = AttributeValue::IntArray(vec![1, 11, 2, 22]);
        let region = Region::from_attribute("ROI", &value).unwrap();
        assert_eq!(region, Region::new(1.0, 11.0, 2.0, 22.0));

        let short = AttributeValue::IntArray(vec![1, 2]);
        assert!(Region::from_attribute("ROI", &short).is_err());
        assert!(Region::from_attribute("ROI", &AttributeValue::Bool(true)).is_err());
    }

    #[test]
    fn region_label() {
        let region = Region::new(10.0, 60.0, 5.0, 25.0);
        assert_eq!(region.label(), "x: 10, y: 5, w: 50, h: 20");
    }

    #[test]
    fn crosshair_clamps_its_own_axis() {
        let bounds = Some(FrameBounds::new(640, 512));
        let v = CrosshairPosition::new(LineAxis::Vertical, 700.4, 900.0).clamped(bounds);
        assert_eq!(v.value(), 640.0);
        let h = CrosshairPosition::new(LineAxis::Horizontal, 700.4, -2.0).clamped(bounds);
        assert_eq!(h.value(), 0.0);
        assert_eq!(h.x, 700.4);
    }

    #[test]
    fn ruler_json_round_trip() {
        let ruler = RulerGeometry::new(Point::new(10.0, 20.0), Point::new(30.0, 40.0));
        let json = ruler.to_json().unwrap();
        assert_eq!(json, r#"{"angle":0.0,"pos":[10.0,20.0],"size":[30.0,40.0]}"#);

        let parsed =
            RulerGeometry::from_attribute("measurementRuler", &AttributeValue::Text(json)).unwrap();
        assert_eq!(parsed, ruler);
        assert_eq!(parsed.center(), Point::new(25.0, 40.0));
    }

    #[test]
    fn ruler_validity() {
        assert!(RulerGeometry::default().is_valid());
        let flat = RulerGeometry::new(Point::new(0.0, 0.0), Point::new(10.0, 0.0));
        assert!(!flat.is_valid());
    }
}
