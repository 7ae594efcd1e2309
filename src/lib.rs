//! # Beam Viewer Core Library
//!
//! Synchronization core for a control-room beam viewer. It mirrors a remote
//! camera device: frames and beam position monitor (BPM) results are fetched
//! on demand, the overlays drawn on the image (ROI, crosshair, calibration
//! ruler) are kept in sync with device attributes in both directions, and
//! pixel coordinates are converted to physical units through a calibration
//! ruler. Rendering is left to whoever consumes the published display state.
//!
//! ## Crate Structure
//!
//! - **`viewer`**: The single-consumer update loop that owns all state and
//!   publishes display snapshots.
//! - **`device`**: The `DeviceProxy` trait, subscription handles and a mock
//!   device for tests and the simulator.
//! - **`events`**: Remote pushes, user actions and fetch completions as one
//!   event type.
//! - **`overlay`**: The Idle / Dragging / ProgrammaticUpdate state machine
//!   that separates local edits from remote updates.
//! - **`calibration`**: Pixel to millimetre mapping.
//! - **`profile`**: BPM profile plots and beam centre markers.
//! - **`bpm`**: BPM result parsing and formatting.
//! - **`frame`** / **`fetch`**: Throttled, last-result-wins fetching.
//! - **`codec`**: Base64 arrays, JSON payloads and video frame decoding.
//! - **`throttle`**: Rate limiting for expensive refresh paths.
//! - **`geometry`**: Pixel-space ROI, crosshair and ruler types.
//! - **`display`**: The `watch`-published display state.
//! - **`export`**: Sidecar metadata for saved images.
//! - **`config`** / **`telemetry`** / **`error`**: Configuration via figment,
//!   tracing setup, and the crate error type.

pub mod bpm;
pub mod calibration;
pub mod codec;
pub mod config;
pub mod device;
pub mod display;
pub mod error;
pub mod events;
pub mod export;
pub mod fetch;
pub mod frame;
pub mod geometry;
pub mod overlay;
pub mod profile;
pub mod simulator;
pub mod telemetry;
pub mod throttle;
pub mod viewer;

pub use error::{AppResult, ViewerError};
pub use viewer::{Viewer, ViewerHandle};
