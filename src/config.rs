//! Viewer configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/beam_viewer.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `BEAM_VIEWER_`, nested keys split
//!    on `__` (e.g. `BEAM_VIEWER_VIEWER__MAX_FRAMERATE=25`)
//!
//! Every section has defaults, so a missing file yields a usable config.
//!
//! # Example
//! ```no_run
//! use beam_viewer::config::ViewerConfig;
//!
//! let config = ViewerConfig::load()?;
//! println!("Image refresh limit: {} Hz", config.viewer.max_framerate);
//! # Ok::<(), beam_viewer::error::ViewerError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, ViewerError};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/beam_viewer.toml";

/// Top-level viewer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Refresh rates and queue sizing
    pub viewer: RefreshConfig,
    /// Calibration defaults
    pub calibration: CalibrationConfig,
    /// Remote attribute names
    pub attributes: AttributeNames,
    /// Plot colours handed to the rendering side
    pub theme: PlotTheme,
    /// Image export settings
    pub export: ExportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Beam Viewer".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Rate limits for the expensive refresh paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Maximum image refreshes per second (0 = unlimited)
    pub max_framerate: u32,
    /// Maximum BPM result refreshes per second (0 = unlimited)
    pub bpm_max_framerate: u32,
    /// Minimum interval between pointer readout updates
    pub pointer_interval_ms: u64,
    /// Capacity of the single-consumer event queue
    pub event_queue_capacity: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_framerate: 10,
            bpm_max_framerate: 10,
            pointer_interval_ms: 100,
            event_queue_capacity: 256,
        }
    }
}

/// Calibration defaults applied before the device reports anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Whether calibrated units are shown at startup
    pub enabled: bool,
    /// Physical ruler width (mm) until the device pushes one
    pub default_width_mm: f64,
    /// Physical ruler height (mm) until the device pushes one
    pub default_height_mm: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_width_mm: 1.0,
            default_height_mm: 1.0,
        }
    }
}

/// Names of the remote attributes the viewer binds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeNames {
    /// "New image available" notifications carrying a frame number
    pub image_number: String,
    /// Frame number used to request BPM results
    pub frame_number: String,
    /// Region of interest `[xmin, xmax, ymin, ymax]`
    pub roi: String,
    /// Crosshair vertical line (x position)
    pub vertical_line: String,
    /// Crosshair horizontal line (y position)
    pub horizontal_line: String,
    /// Calibration ruler geometry (JSON text)
    pub ruler: String,
    /// Physical ruler width in mm
    pub ruler_width: String,
    /// Physical ruler height in mm
    pub ruler_height: String,
    /// Sensor binning factor
    pub binning: String,
}

impl Default for AttributeNames {
    fn default() -> Self {
        Self {
            image_number: "ImageNumber".to_string(),
            frame_number: "FrameNumber".to_string(),
            roi: "ROI".to_string(),
            vertical_line: "verticalLine".to_string(),
            horizontal_line: "horizontalLine".to_string(),
            ruler: "measurementRuler".to_string(),
            ruler_width: "measurementRulerWidth".to_string(),
            ruler_height: "measurementRulerHeight".to_string(),
            binning: "Binning".to_string(),
        }
    }
}

impl AttributeNames {
    /// All attribute names the viewer subscribes to.
    pub fn subscribed(&self) -> [&str; 8] {
        [
            &self.image_number,
            &self.frame_number,
            &self.roi,
            &self.vertical_line,
            &self.horizontal_line,
            &self.ruler,
            &self.ruler_width,
            &self.ruler_height,
        ]
    }
}

/// Plot colours. Passed explicitly to whoever renders the display state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotTheme {
    /// Plot background RGB
    pub background: [u8; 3],
    /// Axis and text RGB
    pub foreground: [u8; 3],
}

impl Default for PlotTheme {
    fn default() -> Self {
        Self {
            background: [50, 50, 50],
            foreground: [255, 255, 255],
        }
    }
}

/// Image export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory proposed for saved images
    pub save_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("."),
        }
    }
}

impl ViewerConfig {
    /// Load configuration from the default path and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: ViewerConfig = Figment::from(Serialized::defaults(ViewerConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BEAM_VIEWER_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ViewerError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.viewer.event_queue_capacity == 0 {
            return Err(ViewerError::Configuration(
                "event_queue_capacity must be at least 1".to_string(),
            ));
        }

        let sizes = [
            self.calibration.default_width_mm,
            self.calibration.default_height_mm,
        ];
        if sizes.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(ViewerError::Configuration(format!(
                "Calibration defaults must be positive, got {:?}",
                sizes
            )));
        }

        let mut names = self.attributes.subscribed().to_vec();
        names.push(&self.attributes.binning);
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(ViewerError::Configuration(
                "Attribute names must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
