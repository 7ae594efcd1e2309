//! Mock camera device for tests and the simulator.
//!
//! `MockDevice` keeps everything in memory:
//!
//! - attribute values, with `emit` pushing change events to subscribers the
//!   way a camera server would (synchronously, from the caller's thread)
//! - stored video frames and BPM results keyed by frame id, with optional
//!   per-frame fetch latency to exercise out-of-order completion
//! - a log of every write and command, for write-back assertions
//! - failure injection for subscriptions, fetches and writes
//!
//! All waiting uses `tokio::time::sleep`, so paused-clock tests stay
//! deterministic.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{AttributeCallback, AttributeValue, DeviceProxy, SubscriptionId};
use crate::error::{AppResult, ViewerError};

#[derive(Default)]
struct MockState {
    attributes: HashMap<String, AttributeValue>,
    subscribers: BTreeMap<SubscriptionId, (String, AttributeCallback)>,
    images: BTreeMap<i64, Bytes>,
    bpm_results: BTreeMap<i64, String>,
    fetch_delays: HashMap<i64, Duration>,
    writes: Vec<(String, AttributeValue)>,
    commands: Vec<String>,
    image_fetches: Vec<i64>,
    fail_subscriptions: bool,
    fail_writes: bool,
    echo_writes: bool,
}

/// In-memory camera device.
///
/// # Example
///
/// ```
/// use beam_viewer::device::{mock::MockDevice, AttributeValue, DeviceProxy};
///
/// # tokio_test::block_on(async {
/// let camera = MockDevice::new("sim/camera/1");
/// camera.write_attribute("ROI", AttributeValue::IntArray(vec![0, 10, 0, 10])).await?;
/// assert_eq!(camera.writes().len(), 1);
/// # Ok::<(), beam_viewer::error::ViewerError>(())
/// # })?;
/// # Ok::<(), beam_viewer::error::ViewerError>(())
/// ```
pub struct MockDevice {
    name: String,
    next_id: AtomicU64,
    state: Mutex<MockState>,
}

impl fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockDevice")
            .field("name", &self.name)
            .field("attributes", &state.attributes.len())
            .field("subscribers", &state.subscribers.len())
            .field("images", &state.images.len())
            .finish()
    }
}

impl MockDevice {
    /// Create an empty device
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(1),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Set an attribute without notifying subscribers.
    pub fn set_attribute(&self, attribute: &str, value: AttributeValue) {
        self.state
            .lock()
            .attributes
            .insert(attribute.to_string(), value);
    }

    /// Current value of an attribute, if set
    pub fn attribute(&self, attribute: &str) -> Option<AttributeValue> {
        self.state.lock().attributes.get(attribute).cloned()
    }

    /// Set an attribute and push the change to every subscriber.
    pub fn emit(&self, attribute: &str, value: AttributeValue) {
        let callbacks: Vec<AttributeCallback> = {
            let mut state = self.state.lock();
            state
                .attributes
                .insert(attribute.to_string(), value.clone());
            state
                .subscribers
                .values()
                .filter(|(name, _)| name == attribute)
                .map(|(_, callback)| callback.clone())
                .collect()
        };
        for callback in callbacks {
            callback(value.clone());
        }
    }

    /// Store an encoded frame under `frame_id`.
    pub fn store_image(&self, frame_id: i64, payload: impl Into<Bytes>) {
        self.state.lock().images.insert(frame_id, payload.into());
    }

    /// Drop a stored frame, as the server does when its buffer wraps.
    pub fn evict_image(&self, frame_id: i64) {
        self.state.lock().images.remove(&frame_id);
    }

    /// Store a JSON BPM result under `frame_id`.
    pub fn store_bpm_result(&self, frame_id: i64, json: impl Into<String>) {
        self.state.lock().bpm_results.insert(frame_id, json.into());
    }

    /// Delay every fetch for `frame_id` by `delay`.
    pub fn set_fetch_delay(&self, frame_id: i64, delay: Duration) {
        self.state.lock().fetch_delays.insert(frame_id, delay);
    }

    /// Make every subsequent subscribe call fail.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.state.lock().fail_subscriptions = fail;
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Push a change event for every successful write.
    pub fn echo_writes(&self, echo: bool) {
        self.state.lock().echo_writes = echo;
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<(String, AttributeValue)> {
        self.state.lock().writes.clone()
    }

    /// Successful writes to one attribute, in order
    pub fn writes_to(&self, attribute: &str) -> Vec<AttributeValue> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(name, _)| name == attribute)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Every executed command, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Frame ids requested through `fetch_image`, in order
    pub fn image_fetches(&self) -> Vec<i64> {
        self.state.lock().image_fetches.clone()
    }

    /// Number of live subscriptions to `attribute`
    pub fn subscriber_count(&self, attribute: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .values()
            .filter(|(name, _)| name == attribute)
            .count()
    }

    async fn fetch_latency(&self, frame_id: i64) {
        let delay = self.state.lock().fetch_delays.get(&frame_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DeviceProxy for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(
        &self,
        attribute: &str,
        callback: AttributeCallback,
    ) -> AppResult<SubscriptionId> {
        let mut state = self.state.lock();
        if state.fail_subscriptions {
            return Err(ViewerError::Subscription {
                attribute: attribute.to_string(),
                reason: "subscriptions disabled".to_string(),
            });
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        state
            .subscribers
            .insert(id, (attribute.to_string(), callback));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().subscribers.remove(&id);
    }

    async fn fetch_image(&self, frame_id: i64) -> AppResult<Bytes> {
        self.state.lock().image_fetches.push(frame_id);
        self.fetch_latency(frame_id).await;
        self.state
            .lock()
            .images
            .get(&frame_id)
            .cloned()
            .ok_or_else(|| ViewerError::FetchFailed {
                frame_id,
                reason: "frame no longer available".to_string(),
            })
    }

    async fn fetch_bpm_result(&self, frame_id: i64) -> AppResult<String> {
        self.fetch_latency(frame_id).await;
        self.state
            .lock()
            .bpm_results
            .get(&frame_id)
            .cloned()
            .ok_or_else(|| ViewerError::FetchFailed {
                frame_id,
                reason: "no BPM result for frame".to_string(),
            })
    }

    async fn read_attribute(&self, attribute: &str) -> AppResult<AttributeValue> {
        self.attribute(attribute)
            .ok_or_else(|| ViewerError::ReadFailed {
                attribute: attribute.to_string(),
                reason: "attribute not set".to_string(),
            })
    }

    async fn write_attribute(&self, attribute: &str, value: AttributeValue) -> AppResult<()> {
        let echo = {
            let mut state = self.state.lock();
            if state.fail_writes {
                return Err(ViewerError::WriteFailed {
                    attribute: attribute.to_string(),
                    reason: "device refused write".to_string(),
                });
            }
            state.writes.push((attribute.to_string(), value.clone()));
            state
                .attributes
                .insert(attribute.to_string(), value.clone());
            state.echo_writes
        };
        if echo {
            self.emit(attribute, value);
        }
        Ok(())
    }

    async fn command(&self, command: &str) -> AppResult<()> {
        let mut state = self.state.lock();
        state.commands.push(command.to_string());
        match command {
            "StartAcquisition" => {
                state.attributes.insert(
                    "AcqStatus".to_string(),
                    AttributeValue::Text("Running".to_string()),
                );
            }
            "StopAcquisition" | "Stop" => {
                state.attributes.insert(
                    "AcqStatus".to_string(),
                    AttributeValue::Text("Ready".to_string()),
                );
            }
            _ => {}
        }
        Ok(())
    }
}
