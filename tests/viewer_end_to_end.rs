//! End-to-end tests for the viewer update loop
//!
//! These drive a `Viewer` against `MockDevice` (directly or through the
//! `Simulator`) on a paused clock, so fetch latency and throttling are
//! deterministic.

use beam_viewer::config::ViewerConfig;
use beam_viewer::device::mock::MockDevice;
use beam_viewer::device::AttributeValue;
use beam_viewer::events::UserAction;
use beam_viewer::export::ExportMetadata;
use beam_viewer::geometry::{Point, Region, RulerGeometry};
use beam_viewer::overlay::{OverlayKind, OverlayState};
use beam_viewer::simulator::Simulator;
use beam_viewer::Viewer;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Helpers
// =============================================================================

fn unlimited() -> ViewerConfig {
    let mut config = ViewerConfig::default();
    config.viewer.max_framerate = 0;
    config.viewer.bpm_max_framerate = 0;
    config
}

fn camera(name: &str) -> Arc<MockDevice> {
    let camera = Arc::new(MockDevice::new(name));
    camera.set_attribute("Width", AttributeValue::Int(640));
    camera.set_attribute("Height", AttributeValue::Int(512));
    camera
}

fn store_frame(camera: &MockDevice, frame_id: i64, width: usize, height: usize) {
    let pixels = ndarray::Array2::from_elem((height, width), frame_id as u16);
    camera.store_image(
        frame_id,
        beam_viewer::codec::encode_video_image(frame_id, &pixels),
    );
}

async fn pump(viewer: &mut Viewer, events: usize) {
    for _ in 0..events {
        assert!(viewer.step().await, "viewer stopped early");
    }
}

async fn user(viewer: &mut Viewer, action: UserAction) {
    viewer
        .handle_event(beam_viewer::events::ViewerEvent::User(action))
        .await;
}

// =============================================================================
// Frame fetching
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_simulated_frame_reaches_display() {
    let camera = Arc::new(MockDevice::new("sim/camera/1"));
    let mut sim = Simulator::new(camera.clone(), 64, 48);
    let mut viewer = Viewer::new(unlimited());
    viewer.attach(camera.clone()).await.unwrap();

    sim.tick().unwrap();
    // ImageNumber, FrameNumber, then both fetch completions
    pump(&mut viewer, 4).await;

    let state = viewer.display_state();
    let frame = state.frame.expect("frame displayed");
    assert_eq!(frame.frame_id, 1);
    assert_eq!((frame.width(), frame.height()), (64, 48));
    assert_eq!(state.frame_number, Some(1));
    assert!(state.bpm.is_some());
    assert_eq!(state.profile_x.unwrap().coordinates.len(), 32);
    assert_eq!(state.profile_y.unwrap().coordinates.len(), 24);
}

#[tokio::test(start_paused = true)]
async fn test_newer_frame_wins_over_slower_older_fetch() {
    let camera = camera("test/camera/1");
    store_frame(&camera, 1, 8, 6);
    store_frame(&camera, 2, 8, 6);
    camera.set_fetch_delay(1, Duration::from_millis(500));

    let mut viewer = Viewer::new(unlimited());
    viewer.attach(camera.clone()).await.unwrap();

    camera.emit("ImageNumber", AttributeValue::Int(1));
    camera.emit("ImageNumber", AttributeValue::Int(2));
    assert_eq!(viewer.process_pending().await, 2);

    // frame 2 lands first, frame 1 half a second later
    pump(&mut viewer, 2).await;

    let frame = viewer.display_state().frame.unwrap();
    assert_eq!(frame.frame_id, 2);
    assert_eq!(frame.value_at(0, 0), Some(2.0));
}

#[tokio::test(start_paused = true)]
async fn test_evicted_frame_keeps_previous_image() {
    let camera = camera("test/camera/1");
    store_frame(&camera, 1, 8, 6);

    let mut viewer = Viewer::new(unlimited());
    viewer.attach(camera.clone()).await.unwrap();

    camera.emit("ImageNumber", AttributeValue::Int(1));
    pump(&mut viewer, 2).await;
    assert_eq!(viewer.display_state().frame.unwrap().frame_id, 1);

    // frame 2 was announced but is gone by the time we ask for it
    camera.emit("ImageNumber", AttributeValue::Int(2));
    pump(&mut viewer, 2).await;

    assert_eq!(camera.image_fetches(), vec![1, 2]);
    assert_eq!(viewer.display_state().frame.unwrap().frame_id, 1);
}

#[tokio::test(start_paused = true)]
async fn test_image_refresh_is_rate_limited() {
    let camera = camera("test/camera/1");
    for id in 1..=4 {
        store_frame(&camera, id, 8, 6);
    }

    // default limit: 10 refreshes per second
    let mut viewer = Viewer::new(ViewerConfig::default());
    viewer.attach(camera.clone()).await.unwrap();

    for id in 1..=3 {
        camera.emit("ImageNumber", AttributeValue::Int(id));
    }
    assert_eq!(viewer.process_pending().await, 3);
    pump(&mut viewer, 1).await;
    assert_eq!(camera.image_fetches(), vec![1]);

    tokio::time::advance(Duration::from_millis(100)).await;
    camera.emit("ImageNumber", AttributeValue::Int(4));
    pump(&mut viewer, 2).await;

    assert_eq!(camera.image_fetches(), vec![1, 4]);
    assert_eq!(viewer.display_state().frame.unwrap().frame_id, 4);
}

#[tokio::test(start_paused = true)]
async fn test_device_swap_discards_outstanding_fetch() {
    let first = camera("test/camera/1");
    store_frame(&first, 1, 8, 6);
    first.set_fetch_delay(1, Duration::from_secs(1));

    let mut viewer = Viewer::new(unlimited());
    viewer.attach(first.clone()).await.unwrap();
    first.emit("ImageNumber", AttributeValue::Int(1));
    pump(&mut viewer, 1).await;

    let second = camera("test/camera/2");
    viewer.attach(second.clone()).await.unwrap();

    // the stale completion still arrives, and is ignored
    pump(&mut viewer, 1).await;

    let state = viewer.display_state();
    assert!(state.frame.is_none());
    assert_eq!(state.device.as_deref(), Some("test/camera/2"));
    assert_eq!(first.subscriber_count("ImageNumber"), 0);
    assert_eq!(second.subscriber_count("ImageNumber"), 1);

    // pushes from the old device no longer reach the viewer
    first.emit("ROI", AttributeValue::IntArray(vec![1, 2, 3, 4]));
    assert_eq!(viewer.process_pending().await, 0);
}

// =============================================================================
// Overlay synchronization
// =============================================================================

#[tokio::test]
async fn test_remote_roi_is_ignored_while_dragging() {
    let camera = camera("test/camera/1");
    let mut viewer = Viewer::new(ViewerConfig::default());
    viewer.attach(camera.clone()).await.unwrap();

    let dragged = Region::from_rect(Point::new(-5.2, 610.7), Point::new(50.0, 50.0));
    user(&mut viewer, UserAction::BeginEdit(OverlayKind::Roi)).await;
    user(&mut viewer, UserAction::DragRoi(dragged)).await;

    camera.emit("ROI", AttributeValue::IntArray(vec![1, 2, 3, 4]));
    assert_eq!(viewer.process_pending().await, 1);
    assert_eq!(viewer.display_state().roi, dragged);
    assert_eq!(viewer.overlay_state(OverlayKind::Roi), OverlayState::Dragging);

    user(&mut viewer, UserAction::FinishEdit(OverlayKind::Roi)).await;

    // one integer write, shifted back inside the 640x512 sensor
    assert_eq!(
        camera.writes_to("ROI"),
        vec![AttributeValue::IntArray(vec![0, 50, 462, 512])]
    );
    assert_eq!(viewer.display_state().roi, Region::new(0.0, 50.0, 462.0, 512.0));
    assert_eq!(viewer.display_state().roi_label, "x: 0, y: 462, w: 50, h: 50");
}

#[tokio::test]
async fn test_remote_update_is_applied_without_write_back() {
    let camera = camera("test/camera/1");
    let mut viewer = Viewer::new(ViewerConfig::default());
    viewer.attach(camera.clone()).await.unwrap();

    camera.emit("ROI", AttributeValue::IntArray(vec![100, 200, 50, 150]));
    camera.emit("verticalLine", AttributeValue::Int(320));
    camera.emit("horizontalLine", AttributeValue::Float(256.0));
    assert_eq!(viewer.process_pending().await, 3);

    let state = viewer.display_state();
    assert_eq!(state.roi, Region::new(100.0, 200.0, 50.0, 150.0));
    assert_eq!(state.lines_label, "Lines: x 320, y 256");
    assert!(camera.writes().is_empty());
}

#[tokio::test]
async fn test_echoed_write_does_not_loop() {
    let camera = camera("test/camera/1");
    camera.echo_writes(true);
    let mut viewer = Viewer::new(ViewerConfig::default());
    viewer.attach(camera.clone()).await.unwrap();

    user(&mut viewer, UserAction::BeginEdit(OverlayKind::VerticalLine)).await;
    user(&mut viewer, UserAction::DragVerticalLine(101.6)).await;
    user(&mut viewer, UserAction::FinishEdit(OverlayKind::VerticalLine)).await;

    // the device echoes the new value back as a push
    assert_eq!(viewer.process_pending().await, 1);
    assert_eq!(viewer.process_pending().await, 0);

    assert_eq!(camera.writes_to("verticalLine"), vec![AttributeValue::Int(102)]);
    assert_eq!(
        viewer.overlay_state(OverlayKind::VerticalLine),
        OverlayState::Idle
    );
}

#[tokio::test]
async fn test_initial_overlay_values_are_read_on_attach() {
    let camera = camera("test/camera/1");
    camera.set_attribute("ROI", AttributeValue::IntArray(vec![10, 110, 20, 220]));
    camera.set_attribute("verticalLine", AttributeValue::Int(64));
    camera.set_attribute(
        "measurementRuler",
        AttributeValue::Text(r#"{"angle": 0.0, "pos": [5, 6], "size": [70, 80]}"#.into()),
    );

    let mut viewer = Viewer::new(ViewerConfig::default());
    viewer.attach(camera.clone()).await.unwrap();

    let state = viewer.display_state();
    assert_eq!(state.roi, Region::new(10.0, 110.0, 20.0, 220.0));
    assert_eq!(state.vertical_line, 64.0);
    assert_eq!(
        state.ruler,
        RulerGeometry::new(Point::new(5.0, 6.0), Point::new(70.0, 80.0))
    );
    assert!(camera.writes().is_empty());
}

#[tokio::test]
async fn test_ruler_form_edit_writes_json_geometry() {
    let camera = camera("test/camera/1");
    let mut viewer = Viewer::new(ViewerConfig::default());
    viewer.attach(camera.clone()).await.unwrap();

    let ruler = RulerGeometry::new(Point::new(10.0, 20.0), Point::new(30.0, 40.0));
    user(&mut viewer, UserAction::SetRulerGeometry(ruler)).await;
    user(&mut viewer, UserAction::SetRulerWidth(2.5)).await;

    assert_eq!(
        camera.writes_to("measurementRuler"),
        vec![AttributeValue::Text(
            r#"{"angle":0.0,"pos":[10.0,20.0],"size":[30.0,40.0]}"#.to_string()
        )]
    );
    assert_eq!(
        camera.writes_to("measurementRulerWidth"),
        vec![AttributeValue::Float(2.5)]
    );
    assert_eq!(viewer.calibration().ruler(), &ruler);
    assert_eq!(viewer.calibration().physical_size(), (2.5, 1.0));
}

// =============================================================================
// Calibration and BPM
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_pointer_readout_in_calibrated_units() {
    let camera = Arc::new(MockDevice::new("sim/camera/1"));
    let mut sim = Simulator::new(camera.clone(), 200, 100);
    let mut viewer = Viewer::new(unlimited());
    viewer.attach(camera.clone()).await.unwrap();
    sim.tick().unwrap();
    pump(&mut viewer, 4).await;

    camera.emit(
        "measurementRuler",
        AttributeValue::Text(r#"{"angle":0.0,"pos":[0,0],"size":[100,100]}"#.into()),
    );
    camera.emit("measurementRulerWidth", AttributeValue::Float(5.0));
    camera.emit("measurementRulerHeight", AttributeValue::Float(5.0));
    assert_eq!(viewer.process_pending().await, 3);
    user(&mut viewer, UserAction::SetCalibrationEnabled(true)).await;

    user(&mut viewer, UserAction::PointerMoved { x: 150.0, y: 30.0 }).await;
    let state = viewer.display_state();
    assert!(state.calibrated);
    assert_eq!(state.unit, "mm");
    assert_eq!(state.pointer_label, "Mouse: x 150, y 30 (5.00, 1.00 mm)");

    // inside the throttle window the readout does not change
    user(&mut viewer, UserAction::PointerMoved { x: 10.0, y: 10.0 }).await;
    assert_eq!(
        viewer.display_state().pointer_label,
        "Mouse: x 150, y 30 (5.00, 1.00 mm)"
    );

    tokio::time::advance(Duration::from_millis(100)).await;
    user(&mut viewer, UserAction::PointerMoved { x: 250.0, y: 30.0 }).await;
    assert_eq!(viewer.display_state().pointer_label, "Mouse: -");
}

#[tokio::test(start_paused = true)]
async fn test_show_beam_position_moves_crosshair() {
    let camera = Arc::new(MockDevice::new("sim/camera/1"));
    let mut sim = Simulator::new(camera.clone(), 64, 48);
    sim.spot.x = 30.0;
    sim.spot.y = 20.0;

    let mut viewer = Viewer::new(unlimited());
    viewer.attach(camera.clone()).await.unwrap();
    user(&mut viewer, UserAction::SetShowBeamPosition(true)).await;
    assert!(camera.writes().is_empty());

    sim.tick().unwrap();
    pump(&mut viewer, 4).await;

    assert_eq!(camera.writes_to("verticalLine"), vec![AttributeValue::Int(30)]);
    assert_eq!(camera.writes_to("horizontalLine"), vec![AttributeValue::Int(20)]);
    let state = viewer.display_state();
    assert!(state.show_beam_position);
    assert_eq!(state.lines_label, "Lines: x 30, y 20");
}

// =============================================================================
// Export and lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_export_sidecar_describes_current_view() {
    let dir = tempfile::tempdir().unwrap();
    let camera = Arc::new(MockDevice::new("sim/camera/1"));
    let mut sim = Simulator::new(camera.clone(), 64, 48);
    let mut viewer = Viewer::new(unlimited());
    viewer.attach(camera.clone()).await.unwrap();
    sim.tick().unwrap();
    pump(&mut viewer, 4).await;

    let sidecar = viewer
        .export_metadata(Some(dir.path().join("shot.png")))
        .await
        .unwrap();
    assert_eq!(sidecar, dir.path().join("shot.json"));

    let text = std::fs::read_to_string(&sidecar).unwrap();
    let metadata: ExportMetadata = serde_json::from_str(&text).unwrap();
    assert_eq!(metadata.camera_device, "sim/camera/1");
    assert_eq!(metadata.camera_type.as_deref(), Some("Simulator"));
    assert_eq!(metadata.width.map(|w| w.value), Some(64));
    assert_eq!(metadata.frame_number, Some(1));
    assert_eq!(metadata.roi.value, vec![16, 48, 12, 36]);
    assert_eq!(metadata.image_filename.as_deref(), Some("shot.png"));
    assert!(metadata.bpm_result.is_some());

    // nothing reported a rotation or a ruler yet
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(value.get("rotation").is_none());
    assert!(value.get("measurement").is_none());
    assert!(value.get("measurement_size").is_none());

    let ruler = RulerGeometry::new(Point::new(4.0, 4.0), Point::new(20.0, 20.0));
    user(&mut viewer, UserAction::SetRulerGeometry(ruler)).await;
    let sidecar = viewer
        .export_metadata(Some(dir.path().join("ruled.png")))
        .await
        .unwrap();
    let metadata: ExportMetadata =
        serde_json::from_str(&std::fs::read_to_string(&sidecar).unwrap()).unwrap();
    assert!(metadata.measurement.is_some());
    assert!(metadata.measurement_size.is_some());
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let camera = Arc::new(MockDevice::new("sim/camera/1"));
    let mut sim = Simulator::new(camera.clone(), 32, 32);
    let mut viewer = Viewer::new(unlimited());
    viewer.attach(camera.clone()).await.unwrap();

    let handle = viewer.handle();
    let mut display = handle.display();
    let task = tokio::spawn(viewer.run());

    sim.tick().unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            display.changed().await.unwrap();
            if display.borrow_and_update().frame.is_some() {
                break;
            }
        }
    })
    .await
    .expect("frame published");

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(camera.subscriber_count("ImageNumber"), 0);
    assert!(handle.send(UserAction::PointerLeft).await.is_err());
}
