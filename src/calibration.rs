//! Pixel to physical unit calibration.
//!
//! The calibration ruler is a rectangle drawn over a feature of known size.
//! With the ruler spanning `w x h` pixels and a physical size of
//! `W x H` mm, the scale is `(W / w, H / h)` mm per pixel and the ruler
//! centre becomes the physical origin:
//!
//! ```text
//! physical = (pixel - centre) * scale
//! pixel    = physical / scale + centre
//! ```
//!
//! Both maps work component-wise in image orientation (y grows downward).
//! [`CalibrationEngine::present`] flips y for axis labels, where physical y
//! grows upward.
//!
//! When calibration is disabled, or the ruler or physical size is unusable
//! (zero, negative or non-finite), both maps are the identity.

use crate::geometry::{Point, RulerGeometry};

/// Maps between pixel and physical coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationEngine {
    enabled: bool,
    ruler: RulerGeometry,
    physical_width: f64,
    physical_height: f64,
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self::new(false, RulerGeometry::default(), 1.0, 1.0)
    }
}

impl CalibrationEngine {
    /// Engine with an initial ruler and physical size (mm)
    pub fn new(enabled: bool, ruler: RulerGeometry, width_mm: f64, height_mm: f64) -> Self {
        Self {
            enabled,
            ruler,
            physical_width: width_mm,
            physical_height: height_mm,
        }
    }

    /// Replace ruler and physical size at once.
    pub fn set_calibration(&mut self, ruler: RulerGeometry, width_mm: f64, height_mm: f64) {
        self.ruler = ruler;
        self.physical_width = width_mm;
        self.physical_height = height_mm;
    }

    /// Replace the pixel-space ruler only.
    pub fn set_ruler(&mut self, ruler: RulerGeometry) {
        self.ruler = ruler;
    }

    /// Replace the physical size only.
    pub fn set_physical_size(&mut self, width_mm: f64, height_mm: f64) {
        self.physical_width = width_mm;
        self.physical_height = height_mm;
    }

    /// Replace the physical width only.
    pub fn set_physical_width(&mut self, width_mm: f64) {
        self.physical_width = width_mm;
    }

    /// Replace the physical height only.
    pub fn set_physical_height(&mut self, height_mm: f64) {
        self.physical_height = height_mm;
    }

    /// Turn calibrated display on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether calibration was requested
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Ruler in pixel space
    pub fn ruler(&self) -> &RulerGeometry {
        &self.ruler
    }

    /// Physical ruler size (mm)
    pub fn physical_size(&self) -> (f64, f64) {
        (self.physical_width, self.physical_height)
    }

    /// Enabled and backed by a usable ruler and physical size.
    pub fn is_active(&self) -> bool {
        let physical_ok = [self.physical_width, self.physical_height]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0);
        self.enabled && physical_ok && self.ruler.is_valid()
    }

    /// mm per pixel on each axis; `(1, 1)` when inactive
    pub fn scale(&self) -> (f64, f64) {
        if self.is_active() {
            (
                self.physical_width / self.ruler.size.x,
                self.physical_height / self.ruler.size.y,
            )
        } else {
            (1.0, 1.0)
        }
    }

    /// Pixel offset applied before scaling (minus the ruler centre); zero when inactive
    pub fn offset(&self) -> Point {
        if self.is_active() {
            let center = self.ruler.center();
            Point::new(-center.x, -center.y)
        } else {
            Point::default()
        }
    }

    /// Pixel to physical
    pub fn transform(&self, pixel: Point) -> Point {
        let (sx, sy) = self.scale();
        let offset = self.offset();
        Point::new((pixel.x + offset.x) * sx, (pixel.y + offset.y) * sy)
    }

    /// Physical to pixel
    pub fn inverse(&self, physical: Point) -> Point {
        let (sx, sy) = self.scale();
        let offset = self.offset();
        Point::new(physical.x / sx - offset.x, physical.y / sy - offset.y)
    }

    /// Pixel to display coordinates: physical with y pointing up when
    /// active, unchanged pixels otherwise.
    pub fn present(&self, pixel: Point) -> Point {
        if self.is_active() {
            let physical = self.transform(pixel);
            Point::new(physical.x, -physical.y)
        } else {
            pixel
        }
    }

    /// Axis unit label
    pub fn unit(&self) -> &'static str {
        if self.is_active() {
            "mm"
        } else {
            "px"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five_mm_ruler() -> CalibrationEngine {
        CalibrationEngine::new(
            true,
            RulerGeometry::new(Point::new(0.0, 0.0), Point::new(100.0, 100.0)),
            5.0,
            5.0,
        )
    }

    #[test]
    fn scale_and_center() {
        let engine = five_mm_ruler();
        assert_eq!(engine.scale(), (0.05, 0.05));
        assert_eq!(engine.offset(), Point::new(-50.0, -50.0));
        assert_eq!(engine.transform(Point::new(150.0, 50.0)), Point::new(5.0, 0.0));
        assert_eq!(engine.transform(Point::new(50.0, 50.0)), Point::default());
    }

    #[test]
    fn inverse_undoes_transform() {
        let engine = CalibrationEngine::new(
            true,
            RulerGeometry::new(Point::new(12.0, 7.0), Point::new(40.0, 25.0)),
            3.0,
            2.0,
        );
        for pixel in [Point::new(0.0, 0.0), Point::new(321.5, 17.25), Point::new(-4.0, 99.0)] {
            let back = engine.inverse(engine.transform(pixel));
            assert!((back.x - pixel.x).abs() < 1e-9);
            assert!((back.y - pixel.y).abs() < 1e-9);
        }
    }

    #[test]
    fn degenerate_calibration_is_identity() {
        let p = Point::new(150.0, 50.0);

        let mut engine = five_mm_ruler();
        engine.set_enabled(false);
        assert_eq!(engine.transform(p), p);

        let mut engine = five_mm_ruler();
        engine.set_ruler(RulerGeometry::new(Point::new(0.0, 0.0), Point::new(0.0, 100.0)));
        assert_eq!(engine.transform(p), p);
        assert_eq!(engine.inverse(p), p);

        let mut engine = five_mm_ruler();
        engine.set_physical_height(f64::NAN);
        assert_eq!(engine.transform(p), p);
        assert_eq!(engine.unit(), "px");
    }

    #[test]
    fn present_points_y_up() {
        let engine = five_mm_ruler();
        assert_eq!(engine.present(Point::new(50.0, 0.0)), Point::new(0.0, 2.5));

        let mut plain = engine.clone();
        plain.set_enabled(false);
        assert_eq!(plain.present(Point::new(50.0, 0.0)), Point::new(50.0, 0.0));
    }
}
