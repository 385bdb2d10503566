// Lag buffer
// Fixed-length delay line of frames between the clip and the virtual camera

use std::collections::VecDeque;

use crate::video::Frame;

/// Number of frames needed to delay playback by `lag_secs` at `fps`.
///
/// Never less than one frame.
pub fn lag_capacity(lag_secs: f64, fps: f64) -> usize {
    // Absorb float noise so e.g. 0.6 s at 30 fps is exactly 18 frames
    let frames = (lag_secs * fps - 1e-9).ceil();
    if frames.is_finite() && frames >= 1.0 {
        frames as usize
    } else {
        1
    }
}

/// Bounded FIFO of frames.
///
/// Pushing into a full buffer evicts the oldest frame and hands it back, so
/// the buffer never holds more than `capacity` frames and the evicted frame is
/// the one due for display.
pub struct LagBuffer {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl LagBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append `frame`. Returns the oldest frame when the buffer was already full.
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = if self.is_full() {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
