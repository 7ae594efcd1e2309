//! Beam profile plots.
//!
//! The BPM result carries one intensity profile per axis, sampled over the
//! ROI. [`ProfileAggregator`] turns a profile into plot coordinates:
//!
//! - sample `i` sits at pixel `roi_origin + i` on its axis
//! - positions go through the calibration map (identity when inactive)
//! - the y axis is mirrored so the plot reads bottom-up like the image
//! - the beam centre marker is clamped into `[roi_origin, roi_origin + len]`
//!   in pixel space before mapping, and a NaN centre leaves the previous
//!   marker where it was
//!
//! Summary statistics (min, max, mean, FWHM) follow the line-profile tool.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationEngine;
use crate::geometry::{Point, Region};

/// Profile axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileAxis {
    /// Along a row (columns)
    X,
    /// Along a column (rows)
    Y,
}

impl ProfileAxis {
    fn index(self) -> usize {
        match self {
            ProfileAxis::X => 0,
            ProfileAxis::Y => 1,
        }
    }

    fn origin(self, roi: &Region) -> f64 {
        match self {
            ProfileAxis::X => roi.xmin,
            ProfileAxis::Y => roi.ymin,
        }
    }
}

/// Profile statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileStats {
    /// Minimum intensity
    pub min: f64,
    /// Maximum intensity
    pub max: f64,
    /// Mean intensity
    pub mean: f64,
    /// Full width at half maximum, in samples
    pub fwhm: Option<f64>,
}

impl ProfileStats {
    /// Compute statistics for `intensities`; non-finite samples are skipped.
    pub fn compute(intensities: &[f64]) -> Self {
        let finite: Vec<f64> = intensities.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Self::default();
        }

        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = finite.iter().sum::<f64>() / finite.len() as f64;

        Self {
            min,
            max,
            mean,
            fwhm: Self::fwhm(intensities, max, min),
        }
    }

    fn fwhm(intensities: &[f64], max: f64, min: f64) -> Option<f64> {
        if max <= min {
            return None;
        }
        let half_max = min + (max - min) / 2.0;
        let first = intensities.iter().position(|v| *v >= half_max)?;
        let last = intensities.iter().rposition(|v| *v >= half_max)?;
        (last > first).then(|| (last - first) as f64)
    }
}

/// Plot-ready profile for one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePlot {
    /// Axis the profile runs along
    pub axis: ProfileAxis,
    /// `(position, value)` pairs
    pub coordinates: Vec<[f64; 2]>,
    /// Centre marker in pixel space, clamped to the ROI span
    pub clamped_center: Option<f64>,
    /// Centre marker in plot coordinates
    pub marker: Option<f64>,
    /// Whether this update moved the marker
    pub center_updated: bool,
    /// Intensity statistics
    pub stats: ProfileStats,
}

/// Builds profile plots and remembers the last good centre per axis.
#[derive(Debug, Clone, Default)]
pub struct ProfileAggregator {
    centers: [Option<f64>; 2],
}

impl ProfileAggregator {
    /// Empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Last accepted pixel-space centre for `axis`
    pub fn center(&self, axis: ProfileAxis) -> Option<f64> {
        self.centers[axis.index()]
    }

    /// Clamp a raw centre into `[origin, origin + len]`.
    pub fn clamp_center(raw_center: f64, origin: f64, len: usize) -> f64 {
        raw_center.clamp(origin, origin + len as f64)
    }

    /// Build the plot for one axis.
    pub fn build(
        &mut self,
        roi: &Region,
        profile: &[f64],
        raw_center: f64,
        axis: ProfileAxis,
        calibration: &CalibrationEngine,
    ) -> ProfilePlot {
        let origin = axis.origin(roi);

        let center_updated = raw_center.is_finite();
        if center_updated {
            self.centers[axis.index()] =
                Some(Self::clamp_center(raw_center, origin, profile.len()));
        } else {
            tracing::trace!(?axis, "non-finite beam centre, keeping previous marker");
        }
        let clamped_center = self.centers[axis.index()];

        let coordinates = profile
            .iter()
            .enumerate()
            .map(|(i, value)| [Self::map(axis, origin + i as f64, calibration), *value])
            .collect();

        ProfilePlot {
            axis,
            coordinates,
            clamped_center,
            marker: clamped_center.map(|c| Self::map(axis, c, calibration)),
            center_updated,
            stats: ProfileStats::compute(profile),
        }
    }

    /// Pixel position on `axis` to plot position.
    fn map(axis: ProfileAxis, pixel: f64, calibration: &CalibrationEngine) -> f64 {
        match axis {
            ProfileAxis::X => calibration.transform(Point::new(pixel, 0.0)).x,
            ProfileAxis::Y => -calibration.transform(Point::new(0.0, pixel)).y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::RulerGeometry;

    fn roi() -> Region {
        Region::new(100.0, 105.0, 200.0, 204.0)
    }

    #[test]
    fn x_profile_positions_start_at_roi() {
        let mut aggregator = ProfileAggregator::new();
        let plot = aggregator.build(
            &roi(),
            &[1.0, 2.0, 3.0],
            101.0,
            ProfileAxis::X,
            &CalibrationEngine::default(),
        );
        assert_eq!(
            plot.coordinates,
            vec![[100.0, 1.0], [101.0, 2.0], [102.0, 3.0]]
        );
        assert_eq!(plot.marker, Some(101.0));
    }

    #[test]
    fn y_profile_is_mirrored() {
        let mut aggregator = ProfileAggregator::new();
        let plot = aggregator.build(
            &roi(),
            &[5.0, 6.0],
            200.0,
            ProfileAxis::Y,
            &CalibrationEngine::default(),
        );
        assert_eq!(plot.coordinates, vec![[-200.0, 5.0], [-201.0, 6.0]]);
        assert_eq!(plot.marker, Some(-200.0));
    }

    #[test]
    fn center_is_clamped_to_roi_span() {
        let mut aggregator = ProfileAggregator::new();
        let profile = [0.0; 10];
        let plot = aggregator.build(
            &roi(),
            &profile,
            5000.0,
            ProfileAxis::X,
            &CalibrationEngine::default(),
        );
        assert_eq!(plot.clamped_center, Some(110.0));

        let plot = aggregator.build(
            &roi(),
            &profile,
            -3.0,
            ProfileAxis::X,
            &CalibrationEngine::default(),
        );
        assert_eq!(plot.clamped_center, Some(100.0));
    }

    #[test]
    fn nan_center_keeps_previous() {
        let mut aggregator = ProfileAggregator::new();
        let calibration = CalibrationEngine::default();
        aggregator.build(&roi(), &[1.0, 2.0], 101.0, ProfileAxis::X, &calibration);

        let plot = aggregator.build(&roi(), &[1.0, 2.0], f64::NAN, ProfileAxis::X, &calibration);
        assert!(!plot.center_updated);
        assert_eq!(plot.clamped_center, Some(101.0));
        assert_eq!(aggregator.center(ProfileAxis::X), Some(101.0));
        assert_eq!(aggregator.center(ProfileAxis::Y), None);
    }

    #[test]
    fn calibrated_positions() {
        let calibration = CalibrationEngine::new(
            true,
            RulerGeometry::new(Point::new(0.0, 0.0), Point::new(100.0, 100.0)),
            5.0,
            5.0,
        );
        let mut aggregator = ProfileAggregator::new();
        let region = Region::new(50.0, 52.0, 50.0, 52.0);
        let plot = aggregator.build(&region, &[1.0, 1.0], 52.0, ProfileAxis::X, &calibration);
        assert_eq!(plot.coordinates[0][0], 0.0);
        assert!((plot.coordinates[1][0] - 0.05).abs() < 1e-12);
        assert!((plot.marker.unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn fwhm_of_peak() {
        let stats = ProfileStats::compute(&[0.0, 1.0, 4.0, 8.0, 10.0, 8.0, 4.0, 1.0, 0.0]);
        assert_eq!(stats.max, 10.0);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.fwhm, Some(2.0));
        assert_eq!(ProfileStats::compute(&[]).fwhm, None);
    }
}
