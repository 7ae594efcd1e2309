//! Overlay synchronization.
//!
//! Each draggable overlay (ROI, the two crosshair lines, the calibration
//! ruler) is mirrored on the device. Two paths can change an overlay:
//!
//! - **local edits**: the user drags a handle. Geometry follows the pointer
//!   while dragging and exactly one write-back is produced on release.
//! - **remote updates**: the device pushes a new value. It is applied to the
//!   local geometry and never written back.
//!
//! The paths are kept apart structurally: [`WriteBack`] can only be created
//! by [`OverlaySync::finish_edit`], and [`OverlaySync::apply_remote`]
//! returns a [`RemoteOutcome`] that carries no write.
//!
//! ```text
//!            begin_edit / drag              finish_edit -> WriteBack
//!   Idle ---------------------> Dragging ---------------------------> Idle
//!    |  apply_remote (dropped while Dragging)
//!    +--> ProgrammaticUpdate --> Idle
//! ```
//!
//! A remote update that arrives mid-drag is dropped; the write-back at
//! release makes the device agree with the user again.

use serde::{Deserialize, Serialize};

use crate::device::AttributeValue;
use crate::error::AppResult;
use crate::geometry::{CrosshairPosition, FrameBounds, Region, RulerGeometry};

/// The overlays kept in sync with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverlayKind {
    /// Region of interest
    Roi,
    /// Crosshair vertical line
    VerticalLine,
    /// Crosshair horizontal line
    HorizontalLine,
    /// Calibration ruler
    Ruler,
}

/// Geometry that can be mirrored on the device.
pub trait OverlayGeometry: Clone + PartialEq + std::fmt::Debug + Send {
    /// Round and clamp into the frame before writing.
    fn clamp_to(&self, bounds: Option<FrameBounds>) -> Self;

    /// Value written to the device attribute.
    fn to_attribute(&self) -> AppResult<AttributeValue>;
}

impl OverlayGeometry for Region {
    fn clamp_to(&self, bounds: Option<FrameBounds>) -> Self {
        self.clamped(bounds)
    }

    fn to_attribute(&self) -> AppResult<AttributeValue> {
        Ok(AttributeValue::IntArray(self.to_wire()))
    }
}

impl OverlayGeometry for CrosshairPosition {
    fn clamp_to(&self, bounds: Option<FrameBounds>) -> Self {
        self.clamped(bounds)
    }

    fn to_attribute(&self) -> AppResult<AttributeValue> {
        Ok(AttributeValue::Int(self.value().round() as i64))
    }
}

impl OverlayGeometry for RulerGeometry {
    fn clamp_to(&self, bounds: Option<FrameBounds>) -> Self {
        self.clamped(bounds)
    }

    fn to_attribute(&self) -> AppResult<AttributeValue> {
        Ok(AttributeValue::Text(self.to_json()?))
    }
}

/// Synchronization state of one overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    /// Nothing in progress
    Idle,
    /// The user is dragging; remote updates are dropped
    Dragging,
    /// A remote value is being applied; local edit signals are ignored
    ProgrammaticUpdate,
}

/// Result of offering a remote value to an overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome<G> {
    /// The geometry now shows the remote value
    Applied(G),
    /// The user is dragging; the value was discarded
    DroppedWhileDragging,
}

/// A write to send to the device after an edit completed.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBack<G> {
    attribute: String,
    value: AttributeValue,
    geometry: G,
}

impl<G> WriteBack<G> {
    /// Target attribute
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Value to write
    pub fn value(&self) -> &AttributeValue {
        &self.value
    }

    /// Clamped geometry that was written
    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    /// Split into attribute name and value
    pub fn into_parts(self) -> (String, AttributeValue) {
        (self.attribute, self.value)
    }
}

/// One overlay and its synchronization state.
#[derive(Debug, Clone)]
pub struct OverlaySync<G> {
    kind: OverlayKind,
    attribute: String,
    geometry: G,
    state: OverlayState,
}

impl<G: OverlayGeometry> OverlaySync<G> {
    /// Overlay bound to `attribute`, starting at `geometry`
    pub fn new(kind: OverlayKind, attribute: impl Into<String>, geometry: G) -> Self {
        Self {
            kind,
            attribute: attribute.into(),
            geometry,
            state: OverlayState::Idle,
        }
    }

    /// Which overlay this is
    pub fn kind(&self) -> OverlayKind {
        self.kind
    }

    /// Device attribute mirrored by this overlay
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Current local geometry
    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    /// Current state
    pub fn state(&self) -> OverlayState {
        self.state
    }

    /// Whether the user is dragging this overlay
    pub fn is_dragging(&self) -> bool {
        self.state == OverlayState::Dragging
    }

    /// The user grabbed the overlay.
    pub fn begin_edit(&mut self) {
        match self.state {
            OverlayState::Idle => self.state = OverlayState::Dragging,
            OverlayState::Dragging => {}
            OverlayState::ProgrammaticUpdate => {
                tracing::trace!(overlay = ?self.kind, "ignoring edit start during remote update");
            }
        }
    }

    /// The user moved the overlay to `geometry`.
    ///
    /// Starts a drag if none is in progress. Returns `false` when the move
    /// was ignored because a remote update is being applied.
    pub fn drag(&mut self, geometry: G) -> bool {
        match self.state {
            OverlayState::Idle | OverlayState::Dragging => {
                self.geometry = geometry;
                self.state = OverlayState::Dragging;
                true
            }
            OverlayState::ProgrammaticUpdate => false,
        }
    }

    /// The user released the overlay.
    ///
    /// The geometry is rounded and clamped into `bounds`, kept locally, and
    /// returned as the single write-back for this edit. Returns `None` when
    /// no drag was in progress.
    pub fn finish_edit(&mut self, bounds: Option<FrameBounds>) -> AppResult<Option<WriteBack<G>>> {
        match self.state {
            OverlayState::Dragging => {
                self.state = OverlayState::Idle;
                self.geometry = self.geometry.clamp_to(bounds);
                let value = self.geometry.to_attribute()?;
                Ok(Some(WriteBack {
                    attribute: self.attribute.clone(),
                    value,
                    geometry: self.geometry.clone(),
                }))
            }
            OverlayState::Idle | OverlayState::ProgrammaticUpdate => Ok(None),
        }
    }

    /// Begin applying a remote value.
    ///
    /// Until [`end_remote`](Self::end_remote) is called the overlay stays in
    /// `ProgrammaticUpdate` and local edit signals are ignored, so a renderer
    /// echoing the change back cannot trigger a write.
    pub fn begin_remote(&mut self, geometry: G) -> RemoteOutcome<G> {
        match self.state {
            OverlayState::Dragging => {
                tracing::debug!(overlay = ?self.kind, "remote update dropped while dragging");
                RemoteOutcome::DroppedWhileDragging
            }
            OverlayState::Idle | OverlayState::ProgrammaticUpdate => {
                self.state = OverlayState::ProgrammaticUpdate;
                self.geometry = geometry.clone();
                RemoteOutcome::Applied(geometry)
            }
        }
    }

    /// Finish applying a remote value.
    pub fn end_remote(&mut self) {
        if self.state == OverlayState::ProgrammaticUpdate {
            self.state = OverlayState::Idle;
        }
    }

    /// Apply a remote value in one step.
    pub fn apply_remote(&mut self, geometry: G) -> RemoteOutcome<G> {
        let outcome = self.begin_remote(geometry);
        self.end_remote();
        outcome
    }
}
