// Randomized "bad connection" effects
//
// Three independent effects are rolled for every frame:
// - freeze: repeat the last emitted frame for a random number of frames
// - downgrade: drop the resolution for a random number of frames
// - extra lag: push duplicates of the frame into the lag buffer
//
// A freeze that is in effect when a frame arrives holds that frame. A freeze
// rolled on a frame starts holding from the next one, so a freeze of N frames
// always produces exactly N held frames before playback moves again.

use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::Rng;

use crate::config::EffectsConfig;
use crate::video::Frame;

/// Mutable effect state for one playback session
#[derive(Debug, Clone, PartialEq)]
pub struct DegradationState {
    pub freeze_frames_remaining: u32,
    pub downgrade_active: bool,
    /// Fraction of native resolution while a downgrade is active
    pub downgrade_scale: f64,
    pub downgrade_frames_remaining: u32,
    pub last_emitted: Option<Frame>,
}

impl Default for DegradationState {
    fn default() -> Self {
        Self {
            freeze_frames_remaining: 0,
            downgrade_active: false,
            downgrade_scale: 1.0,
            downgrade_frames_remaining: 0,
            last_emitted: None,
        }
    }
}

/// What to do with one input frame
#[derive(Debug, Clone)]
pub struct Degraded {
    /// The input frame, resampled if a downgrade is active
    pub frame: Frame,
    /// Duplicate pushes of `frame` to make before the normal push
    pub extra_lag: u32,
    /// Show the last emitted frame instead of buffer output
    pub hold: bool,
}

pub struct DegradationModel<R: Rng> {
    effects: EffectsConfig,
    fps: f64,
    rng: R,
    state: DegradationState,
}

impl<R: Rng> DegradationModel<R> {
    pub fn new(effects: EffectsConfig, fps: f64, rng: R) -> Self {
        Self {
            effects,
            fps,
            rng,
            state: DegradationState::default(),
        }
    }

    pub fn state(&self) -> &DegradationState {
        &self.state
    }

    /// Roll and apply this frame's effects
    pub fn apply(&mut self, frame: Frame) -> Degraded {
        let hold = self.state.freeze_frames_remaining > 0;
        if hold {
            self.state.freeze_frames_remaining -= 1;
        }

        let frame = self.downgrade(frame);
        let extra_lag = self.roll_extra_lag();

        if !hold {
            self.roll_freeze();
        }

        Degraded {
            frame,
            extra_lag,
            hold,
        }
    }

    /// Remember what the camera is showing, for freezes
    pub fn record_emitted(&mut self, frame: &Frame) {
        self.state.last_emitted = Some(frame.clone());
    }

    pub fn last_emitted(&self) -> Option<&Frame> {
        self.state.last_emitted.as_ref()
    }

    fn chance(&mut self, probability: f64) -> bool {
        self.rng.gen::<f64>() < probability
    }

    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if high > low {
            self.rng.gen_range(low..=high)
        } else {
            low
        }
    }

    fn roll_freeze(&mut self) {
        if !self.chance(self.effects.freeze_prob) {
            return;
        }
        let secs = self.uniform(self.effects.freeze_min_s, self.effects.freeze_max_s);
        let frames = (secs * self.fps - 1e-9).ceil();
        if frames >= 1.0 {
            self.state.freeze_frames_remaining = frames as u32;
            log::debug!("Freeze for {} frames ({:.2}s)", frames, secs);
        }
    }

    fn downgrade(&mut self, frame: Frame) -> Frame {
        if !self.state.downgrade_active && self.chance(self.effects.downgrade_prob) {
            let min = self.effects.min_downgrade_frames;
            let max = self.effects.max_downgrade_frames.max(min);
            self.state.downgrade_active = true;
            self.state.downgrade_scale = self.uniform(
                self.effects.downgrade_scale_min,
                self.effects.downgrade_scale_max,
            );
            self.state.downgrade_frames_remaining = self.rng.gen_range(min..=max);
            log::debug!(
                "Resolution downgrade to {:.0}% for {} frames",
                self.state.downgrade_scale * 100.0,
                self.state.downgrade_frames_remaining
            );
        }

        if !self.state.downgrade_active {
            return frame;
        }

        let degraded = match blocky_resample(&frame, self.state.downgrade_scale) {
            Some(degraded) => degraded,
            None => {
                log::warn!("Could not resample {}x{} frame", frame.width(), frame.height());
                frame
            }
        };

        self.state.downgrade_frames_remaining = self.state.downgrade_frames_remaining.saturating_sub(1);
        if self.state.downgrade_frames_remaining == 0 {
            self.state.downgrade_active = false;
        }
        degraded
    }

    fn roll_extra_lag(&mut self) -> u32 {
        if self.effects.max_extra_lag_frames == 0 || !self.chance(self.effects.lag_prob) {
            return 0;
        }
        self.rng.gen_range(1..=self.effects.max_extra_lag_frames)
    }
}

/// Shrink with bilinear filtering, then blow back up with nearest neighbour.
///
/// The result has the input's dimensions but the detail of the smaller image,
/// with hard pixel blocks instead of blur. Returns `None` if the frame buffer
/// does not match its dimensions.
pub fn blocky_resample(frame: &Frame, scale: f64) -> Option<Frame> {
    let (width, height) = (frame.width(), frame.height());
    let small_width = ((width as f64 * scale) as u32).max(1);
    let small_height = ((height as f64 * scale) as u32).max(1);

    // Channel order does not matter to the filters, so BGR passes as RGB
    let image = RgbImage::from_raw(width, height, frame.data().to_vec())?;
    let small = imageops::resize(&image, small_width, small_height, FilterType::Triangle);
    let restored = imageops::resize(&small, width, height, FilterType::Nearest);

    Frame::new(width, height, restored.into_raw()).ok()
}
