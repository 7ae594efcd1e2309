//! The viewer update loop.
//!
//! [`Viewer`] owns every piece of mutable viewer state and is the only
//! consumer of the event queue. Producers never touch that state:
//!
//! - device callbacks forward raw attribute pushes with `try_send`
//! - fetch tasks send their completions back as events
//! - the rendering side sends [`UserAction`]s through a [`ViewerHandle`]
//!
//! After each event the loop publishes a [`DisplayState`] snapshot.
//!
//! ```text
//!  device callbacks ─┐
//!  fetch tasks ──────┼──> mpsc ──> Viewer::step ──> watch<DisplayState>
//!  ViewerHandle ─────┘                 │
//!                                      └──> DeviceProxy (writes, commands)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::bpm::{fetch_bpm, BpmDisplay, BpmFetcher};
use crate::calibration::CalibrationEngine;
use crate::codec::{FrameDecoder, VideoImageDecoder};
use crate::config::ViewerConfig;
use crate::device::{AttributeCallback, AttributeValue, DeviceProxy, SubscriptionSet};
use crate::display::{lines_label, DisplayPublisher, DisplayState};
use crate::error::{AppResult, ViewerError};
use crate::events::{RemoteEvent, UserAction, ViewerEvent};
use crate::export::{default_image_path, write_sidecar, ExportMetadataBuilder};
use crate::fetch::{FetchOutcome, Ticket};
use crate::frame::{fetch_frame, FrameFetcher};
use crate::geometry::{CrosshairPosition, FrameBounds, LineAxis, Point, Region, RulerGeometry};
use crate::overlay::{OverlayKind, OverlayState, OverlaySync, RemoteOutcome, WriteBack};
use crate::profile::{ProfileAggregator, ProfileAxis, ProfilePlot};
use crate::throttle::RateLimiter;

/// Attribute reporting the acquisition state ("Running" while acquiring).
const ACQ_STATUS: &str = "AcqStatus";

/// Cloneable sender side used by renderers and drivers.
#[derive(Debug, Clone)]
pub struct ViewerHandle {
    tx: mpsc::Sender<ViewerEvent>,
    display: watch::Receiver<DisplayState>,
}

impl ViewerHandle {
    /// Queue a user action.
    pub async fn send(&self, action: UserAction) -> AppResult<()> {
        self.tx
            .send(ViewerEvent::User(action))
            .await
            .map_err(|_| ViewerError::QueueClosed)
    }

    /// Ask the update loop to stop after the events already queued.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.tx
            .send(ViewerEvent::Shutdown)
            .await
            .map_err(|_| ViewerError::QueueClosed)
    }

    /// Receiver for display snapshots
    pub fn display(&self) -> watch::Receiver<DisplayState> {
        self.display.clone()
    }
}

/// Single-consumer owner of the viewer state.
pub struct Viewer {
    config: ViewerConfig,
    device: Option<Arc<dyn DeviceProxy>>,
    /// Bumped on every attach and detach; pushes tagged with an older
    /// value are dropped
    binding: u64,
    subscriptions: SubscriptionSet,
    tx: mpsc::Sender<ViewerEvent>,
    rx: mpsc::Receiver<ViewerEvent>,
    frames: FrameFetcher,
    bpm: BpmFetcher,
    roi: OverlaySync<Region>,
    vertical_line: OverlaySync<CrosshairPosition>,
    horizontal_line: OverlaySync<CrosshairPosition>,
    ruler: OverlaySync<RulerGeometry>,
    /// Set once the device reported a ruler or a local ruler edit finished
    ruler_known: bool,
    calibration: CalibrationEngine,
    profiles: ProfileAggregator,
    bpm_display: Option<BpmDisplay>,
    profile_x: Option<ProfilePlot>,
    profile_y: Option<ProfilePlot>,
    show_beam_position: bool,
    pointer: RateLimiter,
    pointer_label: String,
    frame_number: Option<i64>,
    size_hint: Option<FrameBounds>,
    display: DisplayPublisher,
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("device", &self.device.as_ref().map(|d| d.name().to_string()))
            .field("binding", &self.binding)
            .field("subscriptions", &self.subscriptions.len())
            .field("frame_number", &self.frame_number)
            .finish()
    }
}

/// Callback forwarding pushes from `device` into the queue, tagged with the
/// attach generation they belong to.
fn forwarder(
    tx: &mpsc::Sender<ViewerEvent>,
    binding: u64,
    device: &str,
    attribute: &str,
) -> AttributeCallback {
    let tx = tx.clone();
    let device = device.to_string();
    let attribute = attribute.to_string();
    Arc::new(move |value| {
        let event = ViewerEvent::Attribute {
            binding,
            device: device.clone(),
            attribute: attribute.clone(),
            value,
        };
        if let Err(err) = tx.try_send(event) {
            tracing::warn!(%device, %attribute, error = %err, "dropping attribute push");
        }
    })
}

/// Log an error at the level its recoverability calls for.
fn report(err: &ViewerError, context: &'static str) {
    if err.is_recoverable() {
        tracing::warn!(error = %err, context, "recoverable error, keeping previous state");
    } else {
        tracing::error!(error = %err, context, "viewer error");
    }
}

impl Viewer {
    /// Viewer decoding frames as Lima `VIDEO_IMAGE` payloads.
    pub fn new(config: ViewerConfig) -> Self {
        Self::with_decoder(config, Arc::new(VideoImageDecoder))
    }

    /// Viewer with a custom frame decoder.
    pub fn with_decoder(config: ViewerConfig, decoder: Arc<dyn FrameDecoder>) -> Self {
        let (tx, rx) = mpsc::channel(config.viewer.event_queue_capacity.max(1));
        let names = &config.attributes;
        let calibration = CalibrationEngine::new(
            config.calibration.enabled,
            RulerGeometry::default(),
            config.calibration.default_width_mm,
            config.calibration.default_height_mm,
        );
        let display = DisplayPublisher::new(DisplayState {
            theme: config.theme,
            ..DisplayState::default()
        });

        Self {
            frames: FrameFetcher::new(decoder, config.viewer.max_framerate),
            bpm: BpmFetcher::new(config.viewer.bpm_max_framerate),
            roi: OverlaySync::new(OverlayKind::Roi, names.roi.clone(), Region::default()),
            vertical_line: OverlaySync::new(
                OverlayKind::VerticalLine,
                names.vertical_line.clone(),
                CrosshairPosition::new(LineAxis::Vertical, 0.0, 0.0),
            ),
            horizontal_line: OverlaySync::new(
                OverlayKind::HorizontalLine,
                names.horizontal_line.clone(),
                CrosshairPosition::new(LineAxis::Horizontal, 0.0, 0.0),
            ),
            ruler: OverlaySync::new(OverlayKind::Ruler, names.ruler.clone(), RulerGeometry::default()),
            ruler_known: false,
            calibration,
            profiles: ProfileAggregator::new(),
            bpm_display: None,
            profile_x: None,
            profile_y: None,
            show_beam_position: false,
            pointer: RateLimiter::new(Duration::from_millis(config.viewer.pointer_interval_ms)),
            pointer_label: "Mouse: -".to_string(),
            frame_number: None,
            size_hint: None,
            display,
            device: None,
            binding: 0,
            subscriptions: SubscriptionSet::new(),
            tx,
            rx,
            config,
        }
    }

    /// Handle for sending actions and watching the display.
    pub fn handle(&self) -> ViewerHandle {
        ViewerHandle {
            tx: self.tx.clone(),
            display: self.display.subscribe(),
        }
    }

    /// Current display snapshot
    pub fn display_state(&self) -> DisplayState {
        self.display.get()
    }

    /// Attached device, if any
    pub fn device(&self) -> Option<&Arc<dyn DeviceProxy>> {
        self.device.as_ref()
    }

    /// Overlay state of one overlay
    pub fn overlay_state(&self, kind: OverlayKind) -> OverlayState {
        match kind {
            OverlayKind::Roi => self.roi.state(),
            OverlayKind::VerticalLine => self.vertical_line.state(),
            OverlayKind::HorizontalLine => self.horizontal_line.state(),
            OverlayKind::Ruler => self.ruler.state(),
        }
    }

    /// Calibration currently applied
    pub fn calibration(&self) -> &CalibrationEngine {
        &self.calibration
    }

    // =========================================================================
    // Device lifecycle
    // =========================================================================

    /// Attach `device`, replacing any previous one.
    ///
    /// Subscriptions to the previous device are cancelled before the new
    /// ones are opened, fetched values are dropped and outstanding fetches
    /// are ignored when they complete. On failure no device is attached.
    pub async fn attach(&mut self, device: Arc<dyn DeviceProxy>) -> AppResult<()> {
        let name = device.name().to_string();
        tracing::info!(device = %name, "attaching device");

        self.device = None;
        self.binding += 1;
        self.ruler_known = false;
        self.reset_streams();

        let tx = self.tx.clone();
        let binding = self.binding;
        let attributes = self.config.attributes.subscribed();
        if let Err(err) = self
            .subscriptions
            .replace(&device, &attributes, |attribute| {
                forwarder(&tx, binding, &name, attribute)
            })
            .await
        {
            self.refresh_display();
            return Err(err);
        }

        self.device = Some(device.clone());
        self.size_hint = Self::read_size(device.as_ref()).await;
        self.sync_overlays(device.as_ref()).await;
        self.refresh_display();
        Ok(())
    }

    /// Detach the current device and cancel its subscriptions.
    pub fn detach(&mut self) {
        if let Some(device) = self.device.take() {
            tracing::info!(device = device.name(), "detaching device");
        }
        self.binding += 1;
        self.ruler_known = false;
        self.subscriptions.clear();
        self.reset_streams();
        self.refresh_display();
    }

    fn reset_streams(&mut self) {
        self.frames.reset();
        self.bpm.reset();
        self.frame_number = None;
        self.size_hint = None;
        self.bpm_display = None;
        self.profile_x = None;
        self.profile_y = None;
        self.profiles = ProfileAggregator::new();
    }

    async fn read_size(device: &dyn DeviceProxy) -> Option<FrameBounds> {
        let width = device.read_attribute("Width").await.ok()?.as_i64()?;
        let height = device.read_attribute("Height").await.ok()?.as_i64()?;
        Some(FrameBounds::new(
            u32::try_from(width).ok()?,
            u32::try_from(height).ok()?,
        ))
    }

    /// Pull the current overlay values, as if each had just been pushed.
    async fn sync_overlays(&mut self, device: &dyn DeviceProxy) {
        let names = self.config.attributes.clone();
        let attributes = [
            &names.roi,
            &names.vertical_line,
            &names.horizontal_line,
            &names.ruler,
            &names.ruler_width,
            &names.ruler_height,
        ];
        for attribute in attributes {
            let value = match device.read_attribute(attribute).await {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(attribute = %attribute, error = %err, "no initial value");
                    continue;
                }
            };
            match RemoteEvent::from_attribute(&names, attribute, &value) {
                Ok(Some(event)) => self.handle_remote(event),
                Ok(None) => {}
                Err(err) => report(&err, "initial overlay sync"),
            }
        }
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Run until a shutdown event is received.
    pub async fn run(mut self) -> AppResult<()> {
        while self.step().await {}
        self.subscriptions.clear();
        tracing::info!("viewer stopped");
        Ok(())
    }

    /// Wait for one event and apply it. Returns `false` on shutdown.
    pub async fn step(&mut self) -> bool {
        match self.rx.recv().await {
            Some(ViewerEvent::Shutdown) | None => false,
            Some(event) => {
                self.handle_event(event).await;
                true
            }
        }
    }

    /// Apply every event already queued without waiting. Returns how many
    /// were applied.
    pub async fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.rx.try_recv() {
            if matches!(event, ViewerEvent::Shutdown) {
                break;
            }
            self.handle_event(event).await;
            applied += 1;
        }
        applied
    }

    /// Apply one event and publish the resulting display state.
    pub async fn handle_event(&mut self, event: ViewerEvent) {
        match event {
            ViewerEvent::Attribute {
                binding,
                device,
                attribute,
                value,
            } => self.handle_attribute(binding, &device, &attribute, value),
            ViewerEvent::User(action) => self.handle_user(action).await,
            ViewerEvent::FrameFetched { ticket, result } => {
                self.frames.complete(ticket, result);
            }
            ViewerEvent::BpmFetched { ticket, result } => {
                if self.bpm.complete(ticket, result) == FetchOutcome::Applied {
                    self.update_bpm_views();
                    if self.show_beam_position {
                        self.snap_crosshair_to_beam().await;
                    }
                }
            }
            ViewerEvent::Shutdown => {}
        }
        self.refresh_display();
    }

    fn handle_attribute(
        &mut self,
        binding: u64,
        device: &str,
        attribute: &str,
        value: AttributeValue,
    ) {
        if self.device.is_none() || binding != self.binding {
            tracing::debug!(device, attribute, binding, "ignoring push from earlier attach");
            return;
        }
        match RemoteEvent::from_attribute(&self.config.attributes, attribute, &value) {
            Ok(Some(event)) => self.handle_remote(event),
            Ok(None) => tracing::trace!(attribute, "untracked attribute"),
            Err(err) => report(&err, "attribute push"),
        }
    }

    fn handle_remote(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::ImageAvailable(frame_id) => {
                if let Some(ticket) = self.frames.on_image_available(frame_id) {
                    self.spawn_frame_fetch(ticket);
                }
            }
            RemoteEvent::FrameNumber(frame_id) => {
                self.frame_number = Some(frame_id);
                if let Some(ticket) = self.bpm.on_frame_number(frame_id) {
                    self.spawn_bpm_fetch(ticket);
                }
            }
            RemoteEvent::Roi(region) => {
                self.roi.apply_remote(region);
            }
            RemoteEvent::VerticalLine(x) => {
                let position = self.vertical_line.geometry().with_value(x);
                self.vertical_line.apply_remote(position);
            }
            RemoteEvent::HorizontalLine(y) => {
                let position = self.horizontal_line.geometry().with_value(y);
                self.horizontal_line.apply_remote(position);
            }
            RemoteEvent::Ruler(ruler) => {
                if let RemoteOutcome::Applied(ruler) = self.ruler.apply_remote(ruler) {
                    self.ruler_known = true;
                    self.calibration.set_ruler(ruler);
                    self.update_bpm_views();
                }
            }
            RemoteEvent::RulerWidth(width) => {
                self.calibration.set_physical_width(width);
                self.update_bpm_views();
            }
            RemoteEvent::RulerHeight(height) => {
                self.calibration.set_physical_height(height);
                self.update_bpm_views();
            }
        }
    }

    fn spawn_frame_fetch(&self, ticket: Ticket) {
        let Some(device) = self.device.clone() else {
            return;
        };
        let decoder = self.frames.decoder();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = fetch_frame(device, decoder, ticket.frame_id()).await;
            if tx
                .send(ViewerEvent::FrameFetched { ticket, result })
                .await
                .is_err()
            {
                tracing::debug!(frame_id = ticket.frame_id(), "viewer gone before frame arrived");
            }
        });
    }

    fn spawn_bpm_fetch(&self, ticket: Ticket) {
        let Some(device) = self.device.clone() else {
            return;
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = fetch_bpm(device, ticket.frame_id()).await;
            if tx
                .send(ViewerEvent::BpmFetched { ticket, result })
                .await
                .is_err()
            {
                tracing::debug!(frame_id = ticket.frame_id(), "viewer gone before BPM result arrived");
            }
        });
    }

    // =========================================================================
    // User actions
    // =========================================================================

    async fn handle_user(&mut self, action: UserAction) {
        match action {
            UserAction::BeginEdit(kind) => match kind {
                OverlayKind::Roi => self.roi.begin_edit(),
                OverlayKind::VerticalLine => self.vertical_line.begin_edit(),
                OverlayKind::HorizontalLine => self.horizontal_line.begin_edit(),
                OverlayKind::Ruler => self.ruler.begin_edit(),
            },
            UserAction::DragRoi(region) => {
                self.roi.drag(region);
            }
            UserAction::DragVerticalLine(x) => {
                let position = self.vertical_line.geometry().with_value(x);
                self.vertical_line.drag(position);
            }
            UserAction::DragHorizontalLine(y) => {
                let position = self.horizontal_line.geometry().with_value(y);
                self.horizontal_line.drag(position);
            }
            UserAction::DragRuler(ruler) => {
                if self.ruler.drag(ruler) {
                    self.calibration.set_ruler(ruler);
                    self.update_bpm_views();
                }
            }
            UserAction::FinishEdit(kind) => self.finish_edit(kind).await,
            UserAction::SetRulerGeometry(ruler) => {
                self.ruler.begin_edit();
                if self.ruler.drag(ruler) {
                    self.finish_edit(OverlayKind::Ruler).await;
                }
            }
            UserAction::SetRulerWidth(width) => {
                self.calibration.set_physical_width(width);
                self.update_bpm_views();
                let attribute = self.config.attributes.ruler_width.clone();
                self.write(attribute, AttributeValue::Float(width)).await;
            }
            UserAction::SetRulerHeight(height) => {
                self.calibration.set_physical_height(height);
                self.update_bpm_views();
                let attribute = self.config.attributes.ruler_height.clone();
                self.write(attribute, AttributeValue::Float(height)).await;
            }
            UserAction::SetCalibrationEnabled(enabled) => {
                self.calibration.set_enabled(enabled);
                self.update_bpm_views();
            }
            UserAction::SetShowBeamPosition(show) => {
                self.show_beam_position = show;
                if show {
                    self.snap_crosshair_to_beam().await;
                }
            }
            UserAction::SetMaxFramerate(fps) => self.frames.set_max_framerate(fps),
            UserAction::SetBpmMaxFramerate(fps) => self.bpm.set_max_rate(fps),
            UserAction::SetBinning(binning) => {
                if let Err(err) = self.set_binning(binning).await {
                    report(&err, "binning change");
                }
            }
            UserAction::PointerMoved { x, y } => self.pointer_moved(x, y),
            UserAction::PointerLeft => self.pointer_label = "Mouse: -".to_string(),
            UserAction::ExportMetadata { path } => {
                if let Err(err) = self.export_metadata(path).await {
                    report(&err, "metadata export");
                }
            }
        }
    }

    /// Frame bounds used for clamping write-backs.
    fn bounds(&self) -> Option<FrameBounds> {
        self.frames
            .current()
            .map(|frame| frame.bounds())
            .or(self.size_hint)
    }

    async fn finish_edit(&mut self, kind: OverlayKind) {
        let bounds = self.bounds();
        let write = match kind {
            OverlayKind::Roi => self.roi.finish_edit(bounds).map(|w| w.map(WriteBack::into_parts)),
            OverlayKind::VerticalLine => self
                .vertical_line
                .finish_edit(bounds)
                .map(|w| w.map(WriteBack::into_parts)),
            OverlayKind::HorizontalLine => self
                .horizontal_line
                .finish_edit(bounds)
                .map(|w| w.map(WriteBack::into_parts)),
            OverlayKind::Ruler => {
                let write = self.ruler.finish_edit(bounds);
                if let Ok(Some(done)) = &write {
                    self.ruler_known = true;
                    self.calibration.set_ruler(*done.geometry());
                    self.update_bpm_views();
                }
                write.map(|w| w.map(WriteBack::into_parts))
            }
        };
        match write {
            Ok(Some((attribute, value))) => self.write(attribute, value).await,
            Ok(None) => tracing::trace!(overlay = ?kind, "edit finished without a drag"),
            Err(err) => report(&err, "overlay write-back"),
        }
    }

    async fn write(&self, attribute: String, value: AttributeValue) {
        let Some(device) = &self.device else {
            tracing::debug!(%attribute, "no device attached, write skipped");
            return;
        };
        match device.write_attribute(&attribute, value.clone()).await {
            Ok(()) => tracing::debug!(%attribute, %value, "written"),
            Err(err) => report(&err, "attribute write"),
        }
    }

    fn pointer_moved(&mut self, x: f64, y: f64) {
        if !self.pointer.permit() {
            return;
        }
        let inside = self.frames.current().is_some_and(|frame| {
            (0.0..f64::from(frame.width())).contains(&x)
                && (0.0..f64::from(frame.height())).contains(&y)
        });
        self.pointer_label = if inside {
            let mut label = format!("Mouse: x {}, y {}", x.trunc() as i64, y.trunc() as i64);
            if self.calibration.is_active() {
                let physical = self.calibration.present(Point::new(x, y));
                label.push_str(&format!(" ({:.2}, {:.2} mm)", physical.x, physical.y));
            }
            label
        } else {
            "Mouse: -".to_string()
        };
    }

    // =========================================================================
    // BPM
    // =========================================================================

    /// Rebuild BPM labels and profile plots from the latest result.
    fn update_bpm_views(&mut self) {
        let Some(result) = self.bpm.current() else {
            return;
        };
        self.bpm_display = Some(BpmDisplay::format(result, &self.calibration));

        let roi = result.region().unwrap_or(*self.roi.geometry());
        match result.profile_x_values() {
            Ok(values) => {
                self.profile_x = Some(self.profiles.build(
                    &roi,
                    &values,
                    result.center_x(),
                    ProfileAxis::X,
                    &self.calibration,
                ));
            }
            Err(err) => report(&err, "horizontal profile"),
        }
        match result.profile_y_values() {
            Ok(values) => {
                self.profile_y = Some(self.profiles.build(
                    &roi,
                    &values,
                    result.center_y(),
                    ProfileAxis::Y,
                    &self.calibration,
                ));
            }
            Err(err) => report(&err, "vertical profile"),
        }
    }

    /// Move both crosshair lines to the measured beam centre and write them
    /// back. Lines the user is dragging, and non-finite centres, are skipped.
    async fn snap_crosshair_to_beam(&mut self) {
        let Some(result) = self.bpm.current() else {
            return;
        };
        let (x, y) = (result.center_x(), result.center_y());
        let bounds = self.bounds();

        let mut writes = Vec::new();
        for (line, value) in [
            (&mut self.vertical_line, x),
            (&mut self.horizontal_line, y),
        ] {
            if !value.is_finite() || line.state() != OverlayState::Idle {
                continue;
            }
            let position = line.geometry().with_value(value);
            line.drag(position);
            match line.finish_edit(bounds) {
                Ok(Some(write)) => writes.push(write.into_parts()),
                Ok(None) => {}
                Err(err) => report(&err, "beam position"),
            }
        }
        for (attribute, value) in writes {
            self.write(attribute, value).await;
        }
    }

    // =========================================================================
    // Binning
    // =========================================================================

    /// Change the sensor binning with acquisition stopped, then rescale the
    /// ROI so it covers the same part of the sensor.
    pub async fn set_binning(&mut self, binning: i64) -> AppResult<()> {
        let device = self.device.clone().ok_or(ViewerError::NoDevice)?;
        let attribute = self.config.attributes.binning.clone();
        if binning <= 0 {
            return Err(ViewerError::WriteFailed {
                attribute,
                reason: format!("binning must be positive, got {binning}"),
            });
        }
        let old = device
            .read_attribute(&attribute)
            .await?
            .as_i64()
            .filter(|b| *b > 0)
            .ok_or_else(|| ViewerError::malformed(&attribute, "binning is not a positive integer"))?;

        let was_running = acquisition_running(device.as_ref()).await;
        if was_running {
            stop_acquisition(device.as_ref()).await?;
        }
        let written = device
            .write_attribute(&attribute, AttributeValue::Int(binning))
            .await;
        if was_running {
            if let Err(err) = start_acquisition(device.as_ref()).await {
                report(&err, "restart after binning change");
            }
        }
        written?;
        tracing::info!(old, new = binning, "binning changed");

        let factor = old as f64 / binning as f64;
        let scale_bounds = |b: FrameBounds| {
            FrameBounds::new(
                (f64::from(b.width) * factor).round() as u32,
                (f64::from(b.height) * factor).round() as u32,
            )
        };
        let bounds = self.bounds().map(scale_bounds);
        self.size_hint = self.size_hint.map(scale_bounds);

        let roi = *self.roi.geometry();
        let has_area = roi.width() > 0.0 && roi.height() > 0.0;
        if old != binning && has_area && self.roi.state() == OverlayState::Idle {
            let scaled = roi.scaled(factor);
            self.roi.drag(scaled);
            match self.roi.finish_edit(bounds) {
                Ok(Some(write)) => {
                    let (attribute, value) = write.into_parts();
                    self.write(attribute, value).await;
                }
                Ok(None) => {}
                Err(err) => report(&err, "ROI rescale"),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Write the export sidecar for an image saved at `path` (or the default
    /// name in the export directory). Returns the sidecar path.
    pub async fn export_metadata(&self, path: Option<PathBuf>) -> AppResult<PathBuf> {
        let device = self.device.as_ref().ok_or(ViewerError::NoDevice)?;
        let metadata = ExportMetadataBuilder::new(device.name())
            .frame_number(self.frame_number)
            .roi(self.roi.geometry())
            .crosshair(
                self.vertical_line.geometry().value(),
                self.horizontal_line.geometry().value(),
            )
            .measurement(
                self.ruler_known.then(|| *self.ruler.geometry()),
                self.calibration.physical_size(),
            )
            .pixel_scale(self.calibration.scale())
            .bpm_result(self.bpm.current().cloned())
            .read_camera(device.as_ref())
            .await
            .build();
        let path =
            path.unwrap_or_else(|| default_image_path(&self.config.export.save_dir, &metadata));
        write_sidecar(&metadata, &path)
    }

    // =========================================================================
    // Display
    // =========================================================================

    fn refresh_display(&self) {
        let vertical = self.vertical_line.geometry().value();
        let horizontal = self.horizontal_line.geometry().value();
        let state = DisplayState {
            device: self.device.as_ref().map(|d| d.name().to_string()),
            frame: self.frames.current(),
            frame_number: self.frame_number,
            roi: *self.roi.geometry(),
            vertical_line: vertical,
            horizontal_line: horizontal,
            ruler: *self.ruler.geometry(),
            ruler_size_mm: self.calibration.physical_size(),
            calibrated: self.calibration.is_active(),
            unit: self.calibration.unit().to_string(),
            show_beam_position: self.show_beam_position,
            bpm: self.bpm_display.clone(),
            profile_x: self.profile_x.clone(),
            profile_y: self.profile_y.clone(),
            roi_label: self.roi.geometry().label(),
            lines_label: lines_label(vertical, horizontal),
            pointer_label: self.pointer_label.clone(),
            theme: self.config.theme,
        };
        self.display.modify(|current| *current = state);
    }
}

async fn acquisition_running(device: &dyn DeviceProxy) -> bool {
    matches!(
        device.read_attribute(ACQ_STATUS).await,
        Ok(AttributeValue::Text(status)) if status == "Running"
    )
}

async fn stop_acquisition(device: &dyn DeviceProxy) -> AppResult<()> {
    device.command("StopAcquisition").await?;
    device.command("Stop").await
}

async fn start_acquisition(device: &dyn DeviceProxy) -> AppResult<()> {
    device.command("Start").await?;
    device.command("StartAcquisition").await
}
