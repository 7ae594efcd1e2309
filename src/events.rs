//! Events consumed by the viewer update loop.
//!
//! Remote pushes, user actions and completed fetches all become a
//! [`ViewerEvent`] on one bounded queue, and exactly one consumer applies
//! them. Remote pushes are parsed into typed [`RemoteEvent`]s at the
//! consumer, not inside the device callback.

use std::path::PathBuf;

use crate::bpm::BpmResult;
use crate::config::AttributeNames;
use crate::device::AttributeValue;
use crate::error::{AppResult, ViewerError};
use crate::fetch::Ticket;
use crate::frame::Frame;
use crate::geometry::{Region, RulerGeometry};
use crate::overlay::OverlayKind;

/// Everything the update loop reacts to.
#[derive(Debug)]
pub enum ViewerEvent {
    /// Raw attribute push from the attached device
    Attribute {
        /// Attach generation the subscription was opened under
        binding: u64,
        /// Device that produced the push
        device: String,
        /// Attribute name
        attribute: String,
        /// Pushed value
        value: AttributeValue,
    },
    /// Local user interaction
    User(UserAction),
    /// A frame fetch finished
    FrameFetched {
        /// Ticket handed out when the fetch was issued
        ticket: Ticket,
        /// Decoded frame or the failure
        result: AppResult<Frame>,
    },
    /// A BPM fetch finished
    BpmFetched {
        /// Ticket handed out when the fetch was issued
        ticket: Ticket,
        /// Decoded result or the failure
        result: AppResult<BpmResult>,
    },
    /// Stop the update loop
    Shutdown,
}

/// Typed remote push.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// A new image can be fetched
    ImageAvailable(i64),
    /// Frame number for BPM results
    FrameNumber(i64),
    /// ROI moved remotely
    Roi(Region),
    /// Vertical crosshair x
    VerticalLine(f64),
    /// Horizontal crosshair y
    HorizontalLine(f64),
    /// Ruler geometry changed
    Ruler(RulerGeometry),
    /// Physical ruler width (mm)
    RulerWidth(f64),
    /// Physical ruler height (mm)
    RulerHeight(f64),
}

impl RemoteEvent {
    /// Parse a push for `attribute` using the configured attribute names.
    ///
    /// Returns `Ok(None)` for attributes the viewer does not track.
    pub fn from_attribute(
        names: &AttributeNames,
        attribute: &str,
        value: &AttributeValue,
    ) -> AppResult<Option<Self>> {
        let int = |value: &AttributeValue| {
            value
                .as_i64()
                .ok_or_else(|| ViewerError::malformed(attribute, "expected an integer"))
        };
        let float = |value: &AttributeValue| {
            value
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ViewerError::malformed(attribute, "expected a finite number"))
        };

        let event = if attribute == names.image_number {
            RemoteEvent::ImageAvailable(int(value)?)
        } else if attribute == names.frame_number {
            RemoteEvent::FrameNumber(int(value)?)
        } else if attribute == names.roi {
            RemoteEvent::Roi(Region::from_attribute(attribute, value)?)
        } else if attribute == names.vertical_line {
            RemoteEvent::VerticalLine(float(value)?)
        } else if attribute == names.horizontal_line {
            RemoteEvent::HorizontalLine(float(value)?)
        } else if attribute == names.ruler {
            RemoteEvent::Ruler(RulerGeometry::from_attribute(attribute, value)?)
        } else if attribute == names.ruler_width {
            RemoteEvent::RulerWidth(float(value)?)
        } else if attribute == names.ruler_height {
            RemoteEvent::RulerHeight(float(value)?)
        } else {
            return Ok(None);
        };
        Ok(Some(event))
    }
}

/// Local interactions forwarded by whoever renders the display.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    /// The user grabbed an overlay handle
    BeginEdit(OverlayKind),
    /// ROI dragged to a new geometry
    DragRoi(Region),
    /// Vertical line dragged to x
    DragVerticalLine(f64),
    /// Horizontal line dragged to y
    DragHorizontalLine(f64),
    /// Ruler dragged to a new geometry
    DragRuler(RulerGeometry),
    /// The user released an overlay handle
    FinishEdit(OverlayKind),
    /// Ruler geometry typed into the numeric form
    SetRulerGeometry(RulerGeometry),
    /// Physical ruler width typed in (mm)
    SetRulerWidth(f64),
    /// Physical ruler height typed in (mm)
    SetRulerHeight(f64),
    /// Calibrated display toggled
    SetCalibrationEnabled(bool),
    /// Snap the crosshair to the measured beam centre on each BPM update
    SetShowBeamPosition(bool),
    /// Image refresh limit changed (0 = unlimited)
    SetMaxFramerate(u32),
    /// BPM refresh limit changed (0 = unlimited)
    SetBpmMaxFramerate(u32),
    /// Sensor binning changed
    SetBinning(i64),
    /// Pointer moved over the image (pixel coordinates)
    PointerMoved {
        /// Column
        x: f64,
        /// Row
        y: f64,
    },
    /// Pointer left the image
    PointerLeft,
    /// Write the export sidecar for an image saved at `path`
    ExportMetadata {
        /// Image path; a default name in the export directory when `None`
        path: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_configured_attributes() {
        let names = AttributeNames::default();
        assert_eq!(
            RemoteEvent::from_attribute(&names, "ImageNumber", &AttributeValue::Int(9)).unwrap(),
            Some(RemoteEvent::ImageAvailable(9))
        );
        assert_eq!(
            RemoteEvent::from_attribute(&names, "verticalLine", &AttributeValue::Int(12))
                .unwrap(),
            Some(RemoteEvent::VerticalLine(12.0))
        );
        assert_eq!(
            RemoteEvent::from_attribute(
                &names,
                "ROI",
                &AttributeValue::IntArray(vec![1, 2, 3, 4])
            )
            .unwrap(),
            Some(RemoteEvent::Roi(Region::new(1.0, 2.0, 3.0, 4.0)))
        );
    }

    #[test]
    fn ignores_unknown_attributes() {
        let names = AttributeNames::default();
        let parsed =
            RemoteEvent::from_attribute(&names, "Temperature", &AttributeValue::Float(20.0));
        assert_eq!(parsed.unwrap(), None);
    }

    #[test]
    fn rejects_malformed_values() {
        let names = AttributeNames::default();
        let err = RemoteEvent::from_attribute(
            &names,
            "measurementRulerWidth",
            &AttributeValue::Float(f64::NAN),
        )
        .unwrap_err();
        assert!(matches!(err, ViewerError::MalformedAttribute { .. }));

        let err = RemoteEvent::from_attribute(
            &names,
            "measurementRuler",
            &AttributeValue::Text("not json".into()),
        )
        .unwrap_err();
        assert!(err.is_recoverable());
    }
}
