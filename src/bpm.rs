//! Beam position monitor results.
//!
//! The device computes beam statistics per frame and hands them out as a
//! JSON document on request. Results are fetched the same way frames are:
//! rate limited, last result wins, failures keep the previous values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::calibration::CalibrationEngine;
use crate::codec::{decode_structured, EncodedArray};
use crate::device::DeviceProxy;
use crate::error::AppResult;
use crate::fetch::{FetchOutcome, LatestFetch, Ticket};
use crate::geometry::Region;

/// One BPM result as published by the device.
///
/// Missing or `NaN` centres decode as `None`. Fields the viewer does not
/// interpret are kept in `extra` so the export sidecar can carry them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BpmResult {
    /// Integrated intensity; older servers publish it as `intensity`
    #[serde(default, alias = "intensity", skip_serializing_if = "Option::is_none")]
    pub beam_intensity: Option<f64>,
    /// Beam centre column (pixels)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beam_center_x: Option<f64>,
    /// Beam centre row (pixels)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beam_center_y: Option<f64>,
    /// Horizontal FWHM (pixels)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beam_fwhm_x: Option<f64>,
    /// Vertical FWHM (pixels)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beam_fwhm_y: Option<f64>,
    /// ROI the result was computed over, `[xmin, xmax, ymin, ymax]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<Vec<f64>>,
    /// Encoded horizontal profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_x: Option<EncodedArray>,
    /// Encoded vertical profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_y: Option<EncodedArray>,
    /// Acquisition timestamp (seconds since the epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Everything else the device sent
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BpmResult {
    /// Parse the JSON text returned by the device.
    pub fn from_json(text: &str) -> AppResult<Self> {
        decode_structured(text)
    }

    /// Centre column, `NaN` when not reported
    pub fn center_x(&self) -> f64 {
        self.beam_center_x.unwrap_or(f64::NAN)
    }

    /// Centre row, `NaN` when not reported
    pub fn center_y(&self) -> f64 {
        self.beam_center_y.unwrap_or(f64::NAN)
    }

    /// ROI as a region, when present and well formed
    pub fn region(&self) -> Option<Region> {
        match self.roi.as_deref() {
            Some([xmin, xmax, ymin, ymax]) => Some(Region::new(*xmin, *xmax, *ymin, *ymax)),
            _ => None,
        }
    }

    /// Decoded horizontal profile; empty when absent
    pub fn profile_x_values(&self) -> AppResult<Vec<f64>> {
        self.profile_x
            .as_ref()
            .map_or_else(|| Ok(Vec::new()), EncodedArray::decode)
    }

    /// Decoded vertical profile; empty when absent
    pub fn profile_y_values(&self) -> AppResult<Vec<f64>> {
        self.profile_y
            .as_ref()
            .map_or_else(|| Ok(Vec::new()), EncodedArray::decode)
    }
}

/// Text shown for a BPM result, two decimals, in calibrated units when
/// calibration is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpmDisplay {
    /// Intensity
    pub intensity: String,
    /// Centre x
    pub center_x: String,
    /// Centre y
    pub center_y: String,
    /// FWHM x
    pub fwhm_x: String,
    /// FWHM y
    pub fwhm_y: String,
}

impl BpmDisplay {
    /// Format `result` through `calibration`.
    ///
    /// Centres are shifted to the ruler centre then scaled; widths are only
    /// scaled. Missing values show as zero.
    pub fn format(result: &BpmResult, calibration: &CalibrationEngine) -> Self {
        let (sx, sy) = calibration.scale();
        let offset = calibration.offset();
        let fmt = |v: f64| format!("{v:.2}");
        Self {
            intensity: fmt(result.beam_intensity.unwrap_or(0.0)),
            center_x: fmt((result.beam_center_x.unwrap_or(0.0) + offset.x) * sx),
            center_y: fmt((result.beam_center_y.unwrap_or(0.0) + offset.y) * sy),
            fwhm_x: fmt(result.beam_fwhm_x.unwrap_or(0.0) * sx),
            fwhm_y: fmt(result.beam_fwhm_y.unwrap_or(0.0) * sy),
        }
    }
}

/// Fetch and parse the BPM result for one frame. Runs on its own task.
pub async fn fetch_bpm(device: Arc<dyn DeviceProxy>, frame_id: i64) -> AppResult<BpmResult> {
    let text = device.fetch_bpm_result(frame_id).await?;
    BpmResult::from_json(&text)
}

/// Turns frame number pushes into throttled BPM fetches.
#[derive(Debug)]
pub struct BpmFetcher {
    latest: LatestFetch<BpmResult>,
}

impl BpmFetcher {
    /// Fetcher limited to `max_rate` updates per second (0 = unlimited)
    pub fn new(max_rate: u32) -> Self {
        Self {
            latest: LatestFetch::new("bpm", max_rate),
        }
    }

    /// Change the refresh limit
    pub fn set_max_rate(&mut self, fps: u32) {
        self.latest.set_max_rate(fps);
    }

    /// A new frame number was pushed; returns a ticket if a fetch should go out.
    pub fn on_frame_number(&mut self, frame_id: i64) -> Option<Ticket> {
        self.latest.request(frame_id)
    }

    /// Deliver a finished fetch.
    pub fn complete(&mut self, ticket: Ticket, result: AppResult<BpmResult>) -> FetchOutcome {
        self.latest.complete(ticket, result)
    }

    /// Drop the current result and ignore outstanding fetches.
    pub fn reset(&mut self) {
        self.latest.reset();
    }

    /// Newest result
    pub fn current(&self) -> Option<&BpmResult> {
        self.latest.current()
    }
}
