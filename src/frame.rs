//! Camera frames and the frame fetcher.

use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::sync::Arc;

use crate::codec::FrameDecoder;
use crate::device::DeviceProxy;
use crate::error::AppResult;
use crate::fetch::{FetchOutcome, LatestFetch, Ticket};
use crate::geometry::FrameBounds;

/// One decoded camera frame. Immutable once built; shared as `Arc<Frame>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Frame number carried by the payload, or the requested id when the
    /// payload has none
    pub frame_id: i64,
    /// Pixel values, `rows x cols`
    pub pixels: Array2<f64>,
    /// When the frame was decoded
    pub received_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap decoded pixels
    pub fn new(frame_id: i64, pixels: Array2<f64>) -> Self {
        Self {
            frame_id,
            pixels,
            received_at: Utc::now(),
        }
    }

    /// Width in pixels (columns)
    pub fn width(&self) -> u32 {
        self.pixels.ncols() as u32
    }

    /// Height in pixels (rows)
    pub fn height(&self) -> u32 {
        self.pixels.nrows() as u32
    }

    /// Frame bounds for clamping overlay write-backs
    pub fn bounds(&self) -> FrameBounds {
        FrameBounds::new(self.width(), self.height())
    }

    /// Pixel value at column `x`, row `y`, if inside the frame
    pub fn value_at(&self, x: i64, y: i64) -> Option<f64> {
        if x < 0 || y < 0 {
            return None;
        }
        self.pixels.get([y as usize, x as usize]).copied()
    }
}

/// Fetch and decode one frame. Runs on its own task.
pub async fn fetch_frame(
    device: Arc<dyn DeviceProxy>,
    decoder: Arc<dyn FrameDecoder>,
    frame_id: i64,
) -> AppResult<Frame> {
    let payload = device.fetch_image(frame_id).await?;
    let image = decoder.decode(&payload)?;
    let number = image.frame_number.unwrap_or(frame_id);
    if number != frame_id {
        tracing::trace!(frame_id, number, "frame number differs from request");
    }
    Ok(Frame::new(number, image.pixels))
}

/// Turns "image available" notifications into throttled fetches and keeps
/// the newest decoded frame.
pub struct FrameFetcher {
    decoder: Arc<dyn FrameDecoder>,
    latest: LatestFetch<Arc<Frame>>,
}

impl FrameFetcher {
    /// Fetcher limited to `max_framerate` refreshes per second (0 = unlimited)
    pub fn new(decoder: Arc<dyn FrameDecoder>, max_framerate: u32) -> Self {
        Self {
            decoder,
            latest: LatestFetch::new("image", max_framerate),
        }
    }

    /// Decoder used for fetched payloads
    pub fn decoder(&self) -> Arc<dyn FrameDecoder> {
        self.decoder.clone()
    }

    /// Change the refresh limit
    pub fn set_max_framerate(&mut self, fps: u32) {
        self.latest.set_max_rate(fps);
    }

    /// A new frame exists upstream; returns a ticket if it should be fetched.
    pub fn on_image_available(&mut self, frame_id: i64) -> Option<Ticket> {
        self.latest.request(frame_id)
    }

    /// Deliver a finished fetch.
    pub fn complete(&mut self, ticket: Ticket, result: AppResult<Frame>) -> FetchOutcome {
        self.latest.complete(ticket, result.map(Arc::new))
    }

    /// Drop the current frame and ignore outstanding fetches.
    pub fn reset(&mut self) {
        self.latest.reset();
    }

    /// Newest decoded frame
    pub fn current(&self) -> Option<Arc<Frame>> {
        self.latest.current().cloned()
    }
}

impl std::fmt::Debug for FrameFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameFetcher")
            .field("latest", &self.latest)
            .finish()
    }
}
