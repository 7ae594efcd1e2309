//! Export sidecar for saved images.
//!
//! When an image is saved, a JSON document describing the acquisition is
//! written next to it (`image.png` -> `image.json`). Values that describe
//! the camera are read from the device at save time; overlay geometry and
//! the BPM result come from the viewer's own synchronized state.

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bpm::BpmResult;
use crate::device::{AttributeValue, DeviceProxy};
use crate::error::AppResult;
use crate::geometry::{Region, RulerGeometry};

/// Date format used in the sidecar and in default file names.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A value with an optional unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity<T> {
    /// The value
    pub value: T,
    /// Unit, when the value has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl<T> Quantity<T> {
    /// Value with a unit
    pub fn new(value: T, unit: &str) -> Self {
        Self {
            value,
            unit: Some(unit.to_string()),
        }
    }

    /// Value without a unit
    pub fn bare(value: T) -> Self {
        Self { value, unit: None }
    }
}

/// Sidecar document. Field order is the order written to disk; values that
/// were never read or set are left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub date: String,
    pub timestamp: f64,
    pub camera_device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<Quantity<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<Quantity<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition_time: Option<Quantity<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Quantity<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<Quantity<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binning: Option<Quantity<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_mode: Option<Quantity<String>>,
    pub roi: Quantity<Vec<i64>>,
    pub crosshair: Quantity<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement: Option<Quantity<RulerGeometry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_size: Option<Quantity<[f64; 2]>>,
    pub pixel_scale: Quantity<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm_result: Option<Quantity<BpmResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_filename: Option<String>,
}

/// Builder for [`ExportMetadata`].
#[derive(Debug, Clone)]
pub struct ExportMetadataBuilder {
    inner: ExportMetadata,
}

impl ExportMetadataBuilder {
    /// Start a document for `device`. The timestamp defaults to now.
    pub fn new(device: &str) -> Self {
        let timestamp = Local::now().timestamp_millis() as f64 / 1000.0;
        Self {
            inner: ExportMetadata {
                date: format_date(timestamp),
                timestamp,
                camera_device: device.to_string(),
                camera_type: None,
                width: None,
                height: None,
                acquisition_time: None,
                frame_number: None,
                rotation: None,
                gain: None,
                binning: None,
                trigger_mode: None,
                roi: Quantity::new(Vec::new(), "pixel"),
                crosshair: Quantity::new([0.0, 0.0], "pixel"),
                measurement: None,
                measurement_size: None,
                pixel_scale: Quantity::new([1.0, 1.0], "mm/pixel"),
                bpm_result: None,
                image_filename: None,
            },
        }
    }

    /// Acquisition time in seconds since the epoch; also sets the date.
    pub fn timestamp(mut self, timestamp: f64) -> Self {
        self.inner.timestamp = timestamp;
        self.inner.date = format_date(timestamp);
        self
    }

    pub fn camera_type(mut self, camera_type: Option<String>) -> Self {
        self.inner.camera_type = camera_type;
        self
    }

    pub fn size(mut self, width: Option<i64>, height: Option<i64>) -> Self {
        self.inner.width = width.map(|w| Quantity::new(w, "pixel"));
        self.inner.height = height.map(|h| Quantity::new(h, "pixel"));
        self
    }

    pub fn acquisition_time(mut self, ms: Option<f64>) -> Self {
        self.inner.acquisition_time = ms.map(|ms| Quantity::new(ms, "ms"));
        self
    }

    pub fn frame_number(mut self, frame_number: Option<i64>) -> Self {
        self.inner.frame_number = frame_number;
        self
    }

    /// Rotation as reported by the device. A value that is not a whole
    /// number of degrees (e.g. `"NONE"`) is recorded as 0; no value leaves
    /// the field out.
    pub fn rotation(mut self, rotation: Option<&AttributeValue>) -> Self {
        self.inner.rotation =
            rotation.map(|value| Quantity::new(value.as_i64().unwrap_or(0), "degrees"));
        self
    }

    pub fn gain(mut self, gain: Option<f64>) -> Self {
        self.inner.gain = gain.map(Quantity::bare);
        self
    }

    pub fn binning(mut self, binning: Option<i64>) -> Self {
        self.inner.binning = binning.map(Quantity::bare);
        self
    }

    pub fn trigger_mode(mut self, mode: Option<String>) -> Self {
        self.inner.trigger_mode = mode.map(Quantity::bare);
        self
    }

    pub fn roi(mut self, roi: &Region) -> Self {
        self.inner.roi.value = roi.to_wire();
        self
    }

    pub fn crosshair(mut self, x: f64, y: f64) -> Self {
        self.inner.crosshair.value = [x, y];
        self
    }

    /// Ruler geometry and its physical size, once a ruler is known.
    pub fn measurement(mut self, ruler: Option<RulerGeometry>, size_mm: (f64, f64)) -> Self {
        self.inner.measurement = ruler.map(|ruler| Quantity::new(ruler, "pixel"));
        self.inner.measurement_size = ruler.map(|_| Quantity::new([size_mm.0, size_mm.1], "mm"));
        self
    }

    pub fn pixel_scale(mut self, scale: (f64, f64)) -> Self {
        self.inner.pixel_scale.value = [scale.0, scale.1];
        self
    }

    /// Latest BPM result; its timestamp, when present, becomes the document's.
    pub fn bpm_result(mut self, result: Option<BpmResult>) -> Self {
        if let Some(timestamp) = result.as_ref().and_then(|r| r.timestamp) {
            self = self.timestamp(timestamp);
        }
        self.inner.bpm_result = result.map(Quantity::bare);
        self
    }

    /// Read the camera-describing attributes from `device`.
    ///
    /// Unreadable attributes are logged and left empty.
    pub async fn read_camera(self, device: &dyn DeviceProxy) -> Self {
        async fn read(device: &dyn DeviceProxy, attribute: &str) -> Option<AttributeValue> {
            match device.read_attribute(attribute).await {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(attribute, error = %err, "attribute missing from export");
                    None
                }
            }
        }

        let camera_type = read(device, "cameraType").await;
        let width = read(device, "Width").await;
        let height = read(device, "Height").await;
        let exposure = read(device, "Exposure").await;
        let rotation = read(device, "Rotation").await;
        let gain = read(device, "Gain").await;
        let binning = read(device, "Binning").await;
        let trigger_mode = read(device, "TriggerMode").await;

        self.camera_type(camera_type.map(|v| v.to_string()))
            .size(
                width.as_ref().and_then(AttributeValue::as_i64),
                height.as_ref().and_then(AttributeValue::as_i64),
            )
            .acquisition_time(exposure.as_ref().and_then(AttributeValue::as_f64))
            .rotation(rotation.as_ref())
            .gain(gain.as_ref().and_then(AttributeValue::as_f64))
            .binning(binning.as_ref().and_then(AttributeValue::as_i64))
            .trigger_mode(trigger_mode.map(|v| v.to_string()))
    }

    pub fn build(self) -> ExportMetadata {
        self.inner
    }
}

fn format_date(timestamp: f64) -> String {
    let millis = (timestamp * 1000.0).round() as i64;
    match Local.timestamp_millis_opt(millis).single() {
        Some(date) => date.format(DATE_FORMAT).to_string(),
        None => "unknown".to_string(),
    }
}

/// Default image path: `<dir>/image_<camera>_<date>.png`, where `<camera>`
/// is the last segment of the device name and spaces in the date become
/// underscores.
pub fn default_image_path(dir: &Path, metadata: &ExportMetadata) -> PathBuf {
    let camera = metadata
        .camera_device
        .rsplit('/')
        .next()
        .unwrap_or(&metadata.camera_device);
    let date = if metadata.date.is_empty() {
        "unknown".to_string()
    } else {
        metadata.date.replace(' ', "_")
    };
    dir.join(format!("image_{camera}_{date}.png"))
}

/// Write the sidecar for an image saved at `image_path`.
///
/// A missing `.png` extension is appended first. Returns the sidecar path.
pub fn write_sidecar(metadata: &ExportMetadata, image_path: &Path) -> AppResult<PathBuf> {
    let image_path = if image_path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("png"))
        .unwrap_or(false)
    {
        image_path.to_path_buf()
    } else {
        let mut name = image_path.as_os_str().to_os_string();
        name.push(".png");
        PathBuf::from(name)
    };

    let mut document = metadata.clone();
    document.image_filename = image_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    let sidecar = image_path.with_extension("json");
    let json = serde_json::to_string_pretty(&document)?;
    std::fs::write(&sidecar, json)?;
    tracing::info!(path = %sidecar.display(), "export metadata written");
    Ok(sidecar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use crate::geometry::Point;

    fn sample() -> ExportMetadata {
        ExportMetadataBuilder::new("lima/limaccd/cam01")
            .timestamp(1_700_000_000.0)
            .frame_number(Some(42))
            .roi(&Region::new(1.0, 11.0, 2.0, 22.0))
            .build()
    }

    #[test]
    fn default_path_uses_camera_and_date() {
        let metadata = sample();
        let path = default_image_path(Path::new("/data"), &metadata);
        let expected = format!("image_cam01_{}.png", metadata.date.replace(' ', "_"));
        assert_eq!(path, Path::new("/data").join(expected));
        assert!(!path.to_string_lossy().contains(' '));
    }

    #[test]
    fn sidecar_is_written_next_to_image() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = write_sidecar(&sample(), &dir.path().join("shot")).unwrap();
        assert_eq!(sidecar, dir.path().join("shot.json"));

        let text = std::fs::read_to_string(&sidecar).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["image_filename"], "shot.png");
        assert_eq!(value["frame_number"], 42);
        assert_eq!(value["roi"]["value"], serde_json::json!([1, 11, 2, 22]));
        assert_eq!(value["roi"]["unit"], "pixel");
        assert!(value.get("gain").is_none());
        assert!(value.get("rotation").is_none());
    }

    #[test]
    fn bpm_timestamp_wins() {
        let result = BpmResult {
            timestamp: Some(1_600_000_000.0),
            ..Default::default()
        };
        let metadata = ExportMetadataBuilder::new("a/b/c")
            .bpm_result(Some(result))
            .build();
        assert_eq!(metadata.timestamp, 1_600_000_000.0);
        assert_eq!(metadata.date, format_date(1_600_000_000.0));
    }

    #[tokio::test]
    async fn reads_camera_attributes() {
        let camera = MockDevice::new("lima/limaccd/cam01");
        camera.set_attribute("cameraType", AttributeValue::Text("Basler".into()));
        camera.set_attribute("Width", AttributeValue::Int(640));
        camera.set_attribute("Height", AttributeValue::Int(512));
        camera.set_attribute("Rotation", AttributeValue::Text("NONE".into()));
        camera.set_attribute("Binning", AttributeValue::Int(2));

        let metadata = ExportMetadataBuilder::new(camera.name())
            .read_camera(&camera)
            .await
            .build();
        assert_eq!(metadata.camera_type.as_deref(), Some("Basler"));
        assert_eq!(metadata.width, Some(Quantity::new(640, "pixel")));
        assert_eq!(metadata.rotation, Some(Quantity::new(0, "degrees")));
        assert_eq!(metadata.binning, Some(Quantity::bare(2)));
        assert_eq!(metadata.gain, None);

        let value = serde_json::to_value(&metadata).unwrap();
        assert!(value.get("gain").is_none());
        assert!(value.get("acquisition_time").is_none());
        assert!(value.get("trigger_mode").is_none());
    }

    #[tokio::test]
    async fn unreadable_attributes_are_left_out() {
        let camera = MockDevice::new("lima/limaccd/cam02");
        let metadata = ExportMetadataBuilder::new(camera.name())
            .read_camera(&camera)
            .await
            .measurement(None, (1.0, 1.0))
            .build();

        let value = serde_json::to_value(&metadata).unwrap();
        for key in [
            "camera_type",
            "width",
            "height",
            "acquisition_time",
            "frame_number",
            "rotation",
            "gain",
            "binning",
            "trigger_mode",
            "measurement",
            "measurement_size",
            "bpm_result",
            "image_filename",
        ] {
            assert!(value.get(key).is_none(), "{key} should be absent");
        }
        assert_eq!(value["camera_device"], "lima/limaccd/cam02");
        assert_eq!(value["pixel_scale"]["unit"], "mm/pixel");
    }

    #[test]
    fn measurement_recorded_once_ruler_known() {
        let ruler = RulerGeometry::new(Point::new(0.0, 0.0), Point::new(10.0, 20.0));
        let metadata = ExportMetadataBuilder::new("a/b/c")
            .measurement(Some(ruler), (2.0, 3.0))
            .build();
        assert_eq!(metadata.measurement, Some(Quantity::new(ruler, "pixel")));
        assert_eq!(metadata.measurement_size, Some(Quantity::new([2.0, 3.0], "mm")));
    }
}
