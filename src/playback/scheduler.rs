// Playback scheduler
//
// Priming: read the first frame as a still, fill the lag buffer, open the
// camera, show the still, route the output to playback.
// Running: read → degrade → buffer → emit → wait for the next slot, until the
// cancellation token fires or something fails.
//
// Resources are acquired in the order source, camera, playback routing and
// released in reverse on every exit path.

use std::path::Path;

use rand::Rng;
use serde::Serialize;

use super::degrade::DegradationModel;
use super::lag::{lag_capacity, LagBuffer};
use super::{MediaBackend, PlaybackError};
use crate::camera::VirtualCamera;
use crate::cancel::CancellationToken;
use crate::config::{EffectsConfig, PlaybackConfig};
use crate::control::ControlPlane;
use crate::video::{Frame, FrameSource, VideoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    /// Filling the lag buffer, camera not yet routed
    Priming,
    /// Steady-state degraded playback
    Running,
}

/// Summary of one playback stage
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackReport {
    /// Last phase reached
    pub phase: PlaybackPhase,
    /// Frames sent to the camera, including the initial still
    pub frames_emitted: u64,
    /// Emissions that repeated the previous frame because of a freeze
    pub frames_held: u64,
    /// Blank frames emitted because the buffer was not full
    pub frames_blank: u64,
    /// Times the clip looped back to its start
    pub rewinds: u64,
    /// Lag buffer length in frames
    pub lag_frames: usize,
    pub cancelled: bool,
}

impl Default for PlaybackReport {
    fn default() -> Self {
        Self {
            phase: PlaybackPhase::Priming,
            frames_emitted: 0,
            frames_held: 0,
            frames_blank: 0,
            rewinds: 0,
            lag_frames: 0,
            cancelled: false,
        }
    }
}

/// Handles acquired during playback, released by teardown
#[derive(Default)]
struct Acquired {
    source: Option<Box<dyn FrameSource>>,
    camera: Option<Box<dyn VirtualCamera>>,
}

pub struct PlaybackScheduler<R: Rng> {
    base_lag_s: f64,
    effects: EffectsConfig,
    rng: R,
}

impl<R: Rng> PlaybackScheduler<R> {
    pub fn new(playback: &PlaybackConfig, effects: EffectsConfig, rng: R) -> Self {
        Self {
            base_lag_s: playback.base_lag_s,
            effects,
            rng,
        }
    }

    /// Play the clip until `cancel` fires or an error occurs.
    ///
    /// Teardown (record routing, camera close, source close) runs exactly once
    /// whichever way playback ends; teardown failures are only logged.
    pub fn run(
        &mut self,
        backend: &dyn MediaBackend,
        clip_path: &Path,
        control: &dyn ControlPlane,
        cancel: &CancellationToken,
    ) -> Result<PlaybackReport, PlaybackError> {
        let mut acquired = Acquired::default();
        let mut report = PlaybackReport::default();

        let result = self.play(backend, clip_path, control, cancel, &mut acquired, &mut report);

        teardown(acquired, control);

        match &result {
            Ok(()) => log::info!(
                "Playback finished: {} frames emitted, {} held, {} rewinds",
                report.frames_emitted,
                report.frames_held,
                report.rewinds
            ),
            Err(e) => log::error!("Playback failed during {:?}: {}", report.phase, e),
        }

        result.map(|()| report)
    }

    fn play(
        &mut self,
        backend: &dyn MediaBackend,
        clip_path: &Path,
        control: &dyn ControlPlane,
        cancel: &CancellationToken,
        acquired: &mut Acquired,
        report: &mut PlaybackReport,
    ) -> Result<(), PlaybackError> {
        let source = acquired.source.insert(backend.open_source(clip_path)?);
        let clip = *source.info();

        let mut buffer = LagBuffer::new(lag_capacity(self.base_lag_s, clip.fps));
        let mut model = DegradationModel::new(self.effects.clone(), clip.fps, &mut self.rng);
        report.lag_frames = buffer.capacity();

        log::info!(
            "Priming {} frame lag buffer ({:.2}s at {:.2} fps)",
            buffer.capacity(),
            self.base_lag_s,
            clip.fps
        );

        let first = source.read()?.ok_or(VideoError::FirstFrame)?;
        while !buffer.is_full() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }
            buffer.push(read_looping(source.as_mut(), report)?);
        }

        let camera = acquired.camera.insert(backend.open_camera(&clip)?);
        camera.send(&first)?;
        model.record_emitted(&first);
        report.frames_emitted += 1;

        if !camera.wait_next_slot(cancel) || cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(());
        }

        control.switch_to_playback()?;
        report.phase = PlaybackPhase::Running;
        log::info!("Playback running");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let frame = read_looping(source.as_mut(), report)?;
            let degraded = model.apply(frame);

            for _ in 0..degraded.extra_lag {
                buffer.push(degraded.frame.clone());
            }
            if degraded.extra_lag > 0 {
                log::debug!(
                    "Lag spike: {} duplicate frames ({} buffered)",
                    degraded.extra_lag,
                    buffer.len()
                );
            }
            let displaced = buffer.push(degraded.frame);

            let output = match model.last_emitted() {
                Some(last) if degraded.hold => {
                    report.frames_held += 1;
                    last.clone()
                }
                _ => displaced.unwrap_or_else(|| {
                    report.frames_blank += 1;
                    Frame::blank(clip.width, clip.height)
                }),
            };

            if cancel.is_cancelled() {
                break;
            }

            camera.send(&output)?;
            model.record_emitted(&output);
            report.frames_emitted += 1;

            if !camera.wait_next_slot(cancel) {
                break;
            }
        }

        report.cancelled = true;
        Ok(())
    }
}

/// Read the next frame, looping the clip at end of stream
fn read_looping(
    source: &mut dyn FrameSource,
    report: &mut PlaybackReport,
) -> Result<Frame, PlaybackError> {
    if let Some(frame) = source.read()? {
        return Ok(frame);
    }
    source.seek_to_start()?;
    report.rewinds += 1;
    Ok(source.read()?.ok_or(VideoError::EmptyClip)?)
}

fn teardown(mut acquired: Acquired, control: &dyn ControlPlane) {
    log::debug!("Cleaning up playback resources");

    if let Err(e) = control.switch_to_record() {
        log::warn!("Failed to restore record routing: {}", e);
    }
    if let Some(mut camera) = acquired.camera.take() {
        if let Err(e) = camera.close() {
            log::warn!("Error closing virtual camera: {}", e);
        }
    }
    if let Some(mut source) = acquired.source.take() {
        if let Err(e) = source.close() {
            log::warn!("Error closing clip: {}", e);
        }
    }
}
