//! Display state published to the rendering side.
//!
//! The update loop owns all mutable state. After each event it publishes a
//! fresh [`DisplayState`] snapshot through a `tokio::sync::watch` channel;
//! renderers subscribe and always see the latest snapshot, never a partial
//! update.
//!
//! # Example
//!
//! ```
//! use beam_viewer::display::{DisplayPublisher, DisplayState};
//!
//! # tokio_test::block_on(async {
//! let publisher = DisplayPublisher::new(DisplayState::default());
//! let mut rx = publisher.subscribe();
//! publisher.modify(|state| state.pointer_label = "Mouse: x 3, y 4".into());
//! rx.changed().await.unwrap();
//! assert_eq!(rx.borrow().pointer_label, "Mouse: x 3, y 4");
//! # });
//! ```

use std::sync::Arc;
use tokio::sync::watch;

use crate::bpm::BpmDisplay;
use crate::config::PlotTheme;
use crate::frame::Frame;
use crate::geometry::{Region, RulerGeometry};
use crate::profile::ProfilePlot;

/// Everything a renderer needs to draw one update.
///
/// Equality compares frames by identity: two states hold the same frame only
/// if they share the same `Arc`.
#[derive(Debug, Clone)]
pub struct DisplayState {
    /// Attached device name
    pub device: Option<String>,
    /// Latest decoded frame
    pub frame: Option<Arc<Frame>>,
    /// Latest frame number seen for BPM results
    pub frame_number: Option<i64>,
    /// ROI overlay (pixels)
    pub roi: Region,
    /// Vertical crosshair x (pixels)
    pub vertical_line: f64,
    /// Horizontal crosshair y (pixels)
    pub horizontal_line: f64,
    /// Calibration ruler overlay (pixels)
    pub ruler: RulerGeometry,
    /// Physical ruler size (mm)
    pub ruler_size_mm: (f64, f64),
    /// Calibrated units in use
    pub calibrated: bool,
    /// Axis unit label
    pub unit: String,
    /// Crosshair snaps to the beam centre
    pub show_beam_position: bool,
    /// Formatted BPM values
    pub bpm: Option<BpmDisplay>,
    /// Horizontal profile plot
    pub profile_x: Option<ProfilePlot>,
    /// Vertical profile plot
    pub profile_y: Option<ProfilePlot>,
    /// ROI status text
    pub roi_label: String,
    /// Crosshair status text
    pub lines_label: String,
    /// Pointer readout text
    pub pointer_label: String,
    /// Plot colours
    pub theme: PlotTheme,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            device: None,
            frame: None,
            frame_number: None,
            roi: Region::default(),
            vertical_line: 0.0,
            horizontal_line: 0.0,
            ruler: RulerGeometry::default(),
            ruler_size_mm: (1.0, 1.0),
            calibrated: false,
            unit: "px".to_string(),
            show_beam_position: false,
            bpm: None,
            profile_x: None,
            profile_y: None,
            roi_label: Region::default().label(),
            lines_label: lines_label(0.0, 0.0),
            pointer_label: "Mouse: -".to_string(),
            theme: PlotTheme::default(),
        }
    }
}

impl PartialEq for DisplayState {
    fn eq(&self, other: &Self) -> bool {
        let same_frame = match (&self.frame, &other.frame) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_frame
            && self.device == other.device
            && self.frame_number == other.frame_number
            && self.roi == other.roi
            && self.vertical_line == other.vertical_line
            && self.horizontal_line == other.horizontal_line
            && self.ruler == other.ruler
            && self.ruler_size_mm == other.ruler_size_mm
            && self.calibrated == other.calibrated
            && self.unit == other.unit
            && self.show_beam_position == other.show_beam_position
            && self.bpm == other.bpm
            && self.profile_x == other.profile_x
            && self.profile_y == other.profile_y
            && self.roi_label == other.roi_label
            && self.lines_label == other.lines_label
            && self.pointer_label == other.pointer_label
            && self.theme == other.theme
    }
}

/// Crosshair status text.
pub fn lines_label(x: f64, y: f64) -> String {
    format!("Lines: x {}, y {}", x.round() as i64, y.round() as i64)
}

/// Owner side of the display channel.
pub struct DisplayPublisher {
    sender: watch::Sender<DisplayState>,
}

impl std::fmt::Debug for DisplayPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayPublisher")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl DisplayPublisher {
    /// Publisher holding `initial`
    pub fn new(initial: DisplayState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Copy of the current snapshot
    pub fn get(&self) -> DisplayState {
        self.sender.borrow().clone()
    }

    /// Replace the snapshot, notifying subscribers.
    pub fn publish(&self, state: DisplayState) {
        self.sender.send_replace(state);
    }

    /// Edit the snapshot in place; subscribers are notified only on change.
    pub fn modify<F>(&self, edit: F)
    where
        F: FnOnce(&mut DisplayState),
    {
        self.sender.send_if_modified(|state| {
            let before = state.clone();
            edit(state);
            *state != before
        });
    }

    /// New receiver for snapshots
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.sender.subscribe()
    }

    /// Number of live receivers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_labels() {
        let state = DisplayState::default();
        assert_eq!(state.pointer_label, "Mouse: -");
        assert_eq!(state.lines_label, "Lines: x 0, y 0");
        assert_eq!(state.roi_label, "x: 20, y: 20, w: 20, h: 20");
    }

    #[tokio::test]
    async fn unchanged_edit_does_not_notify() {
        let publisher = DisplayPublisher::new(DisplayState::default());
        let mut rx = publisher.subscribe();

        publisher.modify(|state| state.vertical_line = 0.0);
        assert!(!rx.has_changed().unwrap());

        publisher.modify(|state| state.vertical_line = 12.0);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().vertical_line, 12.0);
        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn frames_compare_by_identity() {
        let publisher = DisplayPublisher::new(DisplayState::default());
        let mut rx = publisher.subscribe();
        let frame = Arc::new(Frame::new(1, ndarray::Array2::zeros((480, 640))));

        publisher.modify(|state| state.frame = Some(frame.clone()));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        publisher.modify(|state| state.frame = Some(frame.clone()));
        assert!(!rx.has_changed().unwrap());

        // same pixels, new allocation
        let copy = Arc::new(Frame::clone(&frame));
        publisher.modify(|state| state.frame = Some(copy));
        assert!(rx.has_changed().unwrap());
    }
}
