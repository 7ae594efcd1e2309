//! Remote camera device boundary.
//!
//! The viewer never talks to a control system directly. Everything it needs
//! from the camera server goes through [`DeviceProxy`]:
//!
//! - attribute change subscriptions (frame numbers, ROI, crosshair, ruler)
//! - on-demand fetches of video frames and BPM results by frame id
//! - plain attribute reads and writes for write-back
//! - commands (acquisition start/stop around binning changes)
//!
//! Subscription callbacks may run on any thread. Implementations must not
//! assume the caller's context; the viewer only ever forwards the value into
//! its event queue from inside the callback.
//!
//! # Design Philosophy
//!
//! - async (uses `#[async_trait]`) so network-backed proxies do not block
//! - thread-safe (`Send + Sync`), shared as `Arc<dyn DeviceProxy>`
//! - subscriptions are owned handles: dropping a [`Subscription`] cancels it

pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::AppResult;

/// Identifier of an active subscription, unique per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Value of a device attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Integer scalar
    Int(i64),
    /// Floating point scalar
    Float(f64),
    /// Text, including JSON documents
    Text(String),
    /// Integer spectrum
    IntArray(Vec<i64>),
    /// Floating point spectrum
    FloatArray(Vec<f64>),
    /// Boolean scalar
    Bool(bool),
}

impl AttributeValue {
    /// Numeric scalar as `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer scalar. Floats are accepted when they hold a whole number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            AttributeValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Numeric spectrum as `f64` values
    pub fn as_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            AttributeValue::IntArray(v) => Some(v.iter().map(|x| *x as f64).collect()),
            AttributeValue::FloatArray(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Text(v) => write!(f, "{v}"),
            AttributeValue::IntArray(v) => write!(f, "{v:?}"),
            AttributeValue::FloatArray(v) => write!(f, "{v:?}"),
            AttributeValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Callback invoked with each pushed attribute value.
pub type AttributeCallback = Arc<dyn Fn(AttributeValue) + Send + Sync>;

/// A remote camera device.
#[async_trait]
pub trait DeviceProxy: Send + Sync {
    /// Device name, e.g. `lima/limaccd/1`
    fn name(&self) -> &str;

    /// Register `callback` for change events on `attribute`.
    async fn subscribe(
        &self,
        attribute: &str,
        callback: AttributeCallback,
    ) -> AppResult<SubscriptionId>;

    /// Cancel a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Fetch the encoded video frame for `frame_id`.
    ///
    /// Fails when the frame is no longer available upstream.
    async fn fetch_image(&self, frame_id: i64) -> AppResult<Bytes>;

    /// Fetch the JSON-encoded BPM result for `frame_id`.
    async fn fetch_bpm_result(&self, frame_id: i64) -> AppResult<String>;

    /// Read the current value of an attribute.
    async fn read_attribute(&self, attribute: &str) -> AppResult<AttributeValue>;

    /// Write an attribute.
    async fn write_attribute(&self, attribute: &str, value: AttributeValue) -> AppResult<()>;

    /// Execute a command without arguments.
    async fn command(&self, command: &str) -> AppResult<()>;
}

/// An active subscription. Cancelled when dropped.
pub struct Subscription {
    device: Weak<dyn DeviceProxy>,
    id: SubscriptionId,
    attribute: String,
    active: bool,
}

impl Subscription {
    /// Subscribe `callback` to `attribute` on `device`.
    pub async fn open(
        device: &Arc<dyn DeviceProxy>,
        attribute: &str,
        callback: AttributeCallback,
    ) -> AppResult<Self> {
        let id = device.subscribe(attribute, callback).await?;
        Ok(Self {
            device: Arc::downgrade(device),
            id,
            attribute: attribute.to_string(),
            active: true,
        })
    }

    /// Subscription id
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscribed attribute
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Cancel now instead of on drop.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(device) = self.device.upgrade() {
            tracing::debug!(attribute = %self.attribute, id = self.id.0, "unsubscribing");
            device.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attribute", &self.attribute)
            .field("active", &self.active)
            .finish()
    }
}

/// All subscriptions held for the attached device.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every held subscription.
    pub fn clear(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.cancel();
        }
    }

    /// Cancel the current subscriptions, then subscribe to `attributes` on
    /// `device`, building each callback with `make_callback`.
    ///
    /// Old handles are released before any new subscription is opened, so
    /// no callback from the previous device can fire after this returns.
    /// On failure the set is left empty.
    pub async fn replace<F>(
        &mut self,
        device: &Arc<dyn DeviceProxy>,
        attributes: &[&str],
        mut make_callback: F,
    ) -> AppResult<()>
    where
        F: FnMut(&str) -> AttributeCallback,
    {
        self.clear();
        let mut opened = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            let callback = make_callback(attribute);
            opened.push(Subscription::open(device, attribute, callback).await?);
        }
        self.subscriptions = opened;
        Ok(())
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// True when nothing is subscribed
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
