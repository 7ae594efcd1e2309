//! Simulated beam camera.
//!
//! Drives a [`MockDevice`] the way a camera server with a BPM plugin would:
//! each tick renders a Gaussian beam spot, stores the encoded frame and its
//! BPM result, then pushes the new frame number. Useful for running the
//! viewer without hardware and for end-to-end tests.

use ndarray::Array2;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{encode_base64_array, encode_video_image};
use crate::device::mock::MockDevice;
use crate::device::AttributeValue;
use crate::error::AppResult;
use crate::geometry::Region;

/// Unnormalised Gaussian.
pub fn gaussian(x: f64, mu: f64, sigma: f64) -> f64 {
    (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Beam spot parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamSpot {
    /// Centre column
    pub x: f64,
    /// Centre row
    pub y: f64,
    /// Standard deviation (pixels)
    pub sigma: f64,
    /// Peak value
    pub peak: f64,
}

/// Generates frames and BPM results on a mock device.
#[derive(Debug)]
pub struct Simulator {
    device: Arc<MockDevice>,
    width: usize,
    height: usize,
    frame_number: i64,
    /// Beam spot; move it between ticks to simulate drift
    pub spot: BeamSpot,
}

impl Simulator {
    /// Simulator rendering `width x height` frames onto `device`.
    ///
    /// Seeds the device with size, binning, acquisition status and a default
    /// ROI covering the middle of the sensor.
    pub fn new(device: Arc<MockDevice>, width: usize, height: usize) -> Self {
        device.set_attribute("Width", AttributeValue::Int(width as i64));
        device.set_attribute("Height", AttributeValue::Int(height as i64));
        device.set_attribute("Binning", AttributeValue::Int(1));
        device.set_attribute("cameraType", AttributeValue::Text("Simulator".into()));
        device.set_attribute("AcqStatus", AttributeValue::Text("Running".into()));
        let (w, h) = (width as i64, height as i64);
        device.set_attribute(
            "ROI",
            AttributeValue::IntArray(vec![w / 4, 3 * w / 4, h / 4, 3 * h / 4]),
        );

        Self {
            device,
            width,
            height,
            frame_number: 0,
            spot: BeamSpot {
                x: width as f64 / 2.0,
                y: height as f64 / 2.0,
                sigma: (width.min(height) as f64 / 16.0).max(1.0),
                peak: 4000.0,
            },
        }
    }

    /// Device being driven
    pub fn device(&self) -> &Arc<MockDevice> {
        &self.device
    }

    /// Last frame number produced
    pub fn frame_number(&self) -> i64 {
        self.frame_number
    }

    /// Render the current spot.
    pub fn render(&self) -> Array2<u16> {
        let spot = self.spot;
        Array2::from_shape_fn((self.height, self.width), |(row, col)| {
            let value =
                spot.peak * gaussian(col as f64, spot.x, spot.sigma) * gaussian(row as f64, spot.y, spot.sigma);
            value.round().clamp(0.0, f64::from(u16::MAX)) as u16
        })
    }

    /// BPM result for `pixels` over the device's current ROI.
    pub fn bpm_result(&self, pixels: &Array2<u16>) -> AppResult<String> {
        let roi = self
            .device
            .attribute("ROI")
            .and_then(|v| Region::from_attribute("ROI", &v).ok())
            .unwrap_or_else(|| Region::new(0.0, self.width as f64, 0.0, self.height as f64))
            .clamped(Some(crate::geometry::FrameBounds::new(
                self.width as u32,
                self.height as u32,
            )));
        let (x0, x1) = (roi.xmin as usize, roi.xmax as usize);
        let (y0, y1) = (roi.ymin as usize, roi.ymax as usize);

        let window = pixels.slice(ndarray::s![y0..y1, x0..x1]).mapv(f64::from);
        let profile_x: Vec<f64> = window.sum_axis(ndarray::Axis(0)).to_vec();
        let profile_y: Vec<f64> = window.sum_axis(ndarray::Axis(1)).to_vec();
        let intensity = window.sum();

        let centroid = |profile: &[f64], origin: usize| {
            let total: f64 = profile.iter().sum();
            if total > 0.0 {
                profile
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (origin + i) as f64 * v)
                    .sum::<f64>()
                    / total
            } else {
                f64::NAN
            }
        };
        let fwhm = 2.0 * (2.0 * std::f64::consts::LN_2).sqrt() * self.spot.sigma;
        let center_x = centroid(&profile_x, x0);
        let center_y = centroid(&profile_y, y0);

        let document = json!({
            "beam_intensity": intensity,
            "beam_center_x": center_x.is_finite().then_some(center_x),
            "beam_center_y": center_y.is_finite().then_some(center_y),
            "beam_fwhm_x": fwhm,
            "beam_fwhm_y": fwhm,
            "roi": roi.to_wire(),
            "profile_x": encode_base64_array(&profile_x),
            "profile_y": encode_base64_array(&profile_y),
            "timestamp": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        });
        Ok(serde_json::to_string(&document)?)
    }

    /// Produce one frame: store image and BPM result, then push the frame
    /// number on both notification attributes.
    pub fn tick(&mut self) -> AppResult<i64> {
        self.frame_number += 1;
        let pixels = self.render();
        self.device
            .store_image(self.frame_number, encode_video_image(self.frame_number, &pixels));
        self.device
            .store_bpm_result(self.frame_number, self.bpm_result(&pixels)?);
        self.device
            .emit("ImageNumber", AttributeValue::Int(self.frame_number));
        self.device
            .emit("FrameNumber", AttributeValue::Int(self.frame_number));
        Ok(self.frame_number)
    }

    /// Tick `count` times, `interval` apart, drifting the spot slowly.
    pub async fn run(&mut self, count: usize, interval: Duration) -> AppResult<()> {
        let mut ticker = tokio::time::interval(interval);
        for i in 0..count {
            ticker.tick().await;
            let phase = i as f64 / 20.0;
            self.spot.x = self.width as f64 / 2.0 + phase.sin() * self.spot.sigma;
            self.spot.y = self.height as f64 / 2.0 + phase.cos() * self.spot.sigma;
            let frame = self.tick()?;
            tracing::trace!(frame, "simulated frame");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpm::BpmResult;
    use crate::device::DeviceProxy;

    #[test]
    fn gaussian_peaks_at_mean() {
        assert_eq!(gaussian(3.0, 3.0, 1.0), 1.0);
        assert!(gaussian(5.0, 3.0, 1.0) < 0.2);
    }

    #[test]
    fn debug_output_names_the_device() {
        let device = Arc::new(MockDevice::new("sim/camera/1"));
        let simulator = Simulator::new(device, 8, 6);
        let text = format!("{simulator:?}");
        assert!(text.contains("sim/camera/1"));
        assert!(text.contains("MockDevice"));
    }

    #[tokio::test]
    async fn tick_publishes_frame_and_bpm_result() {
        let camera = Arc::new(MockDevice::new("sim/camera/1"));
        let mut sim = Simulator::new(camera.clone(), 64, 48);
        sim.spot.x = 30.0;
        sim.spot.y = 20.0;
        let frame = sim.tick().unwrap();

        assert_eq!(frame, 1);
        assert_eq!(camera.attribute("ImageNumber"), Some(AttributeValue::Int(1)));
        assert!(camera.fetch_image(1).await.is_ok());

        let result = BpmResult::from_json(&camera.fetch_bpm_result(1).await.unwrap()).unwrap();
        assert!((result.center_x() - 30.0).abs() < 0.5);
        assert!((result.center_y() - 20.0).abs() < 0.5);
        assert_eq!(result.region(), Some(Region::new(16.0, 48.0, 12.0, 36.0)));
        assert_eq!(result.profile_x_values().unwrap().len(), 32);
    }
}
