// Virtual camera output
//
// The playback scheduler writes frames to a `VirtualCamera` and then waits for
// the next frame slot. `FramePacer` implements the slot timing so every sink
// paces the same way.

pub mod v4l2;

pub use v4l2::GstVirtualCamera;

use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::video::Frame;

/// Destination for played-back frames
pub trait VirtualCamera: Send {
    /// Present one frame. The frame must match the size the camera was opened with.
    fn send(&mut self, frame: &Frame) -> Result<(), CameraError>;

    /// Block until one frame period has elapsed since the previous slot.
    ///
    /// Returns `false` if `cancel` fired while waiting.
    fn wait_next_slot(&mut self, cancel: &CancellationToken) -> bool;

    /// Release the output device. Calling it twice is harmless.
    fn close(&mut self) -> Result<(), CameraError>;
}

/// Deadline-based frame pacing.
///
/// Slots are spaced one interval apart from the first wait. When the caller
/// falls more than a full interval behind, the schedule restarts from now
/// instead of bursting frames to catch up.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    next_slot: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / fps),
            next_slot: None,
        }
    }

    /// Wait for the next slot. Returns `false` when cancelled.
    pub fn wait(&mut self, cancel: &CancellationToken) -> bool {
        let now = Instant::now();
        let mut slot = self.next_slot.unwrap_or(now + self.interval);
        if slot + self.interval < now {
            log::debug!(
                "Frame pacing fell behind by {:?}, resyncing",
                now.duration_since(slot)
            );
            slot = now;
        }
        self.next_slot = Some(slot + self.interval);
        cancel.sleep_until(slot)
    }
}

/// Error type for virtual camera output
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Virtual camera device unavailable: {0}")]
    Unavailable(String),

    #[error("GStreamer error: {0}")]
    Gst(String),

    #[error("Frame is {actual_width}x{actual_height}, camera expects {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Failed to push frame: {0}")]
    Push(String),

    #[error("Virtual camera is closed")]
    Closed,
}
