// In-memory clip, camera and control plane for unit tests

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::camera::{CameraError, FramePacer, VirtualCamera};
use crate::cancel::CancellationToken;
use crate::control::{ControlError, ControlPlane, RecordingHandle};
use crate::playback::MediaBackend;
use crate::video::{ClipInfo, Frame, FrameSource, VideoError};

/// 1x1 frame whose pixels all equal `tag`
pub fn tagged(tag: u8) -> Frame {
    Frame::new(1, 1, vec![tag; 3]).unwrap()
}

#[derive(Default)]
struct Observed {
    emitted: Vec<Frame>,
    reads: usize,
    source_closed: bool,
    camera_opened: bool,
    camera_closed: bool,
}

/// Backend serving `frames` tagged 1x1 frames and recording what the camera shows
pub struct FakeBackend {
    frames: usize,
    fps: f64,
    stop_after: Option<usize>,
    fail_read_after: Option<usize>,
    fail_send_after: Option<usize>,
    camera_unavailable: bool,
    paced: bool,
    stopper: CancellationToken,
    observed: Arc<Mutex<Observed>>,
}

impl FakeBackend {
    pub fn new(frames: usize, fps: f64) -> Self {
        Self {
            frames,
            fps,
            stop_after: None,
            fail_read_after: None,
            fail_send_after: None,
            camera_unavailable: false,
            paced: false,
            stopper: CancellationToken::new(),
            observed: Arc::default(),
        }
    }

    /// Cancel [`cancel_token`](Self::cancel_token) once the camera has shown `frames` frames
    pub fn stop_after(mut self, frames: usize) -> Self {
        self.stop_after = Some(frames);
        self
    }

    pub fn fail_read_after(mut self, reads: usize) -> Self {
        self.fail_read_after = Some(reads);
        self
    }

    /// The camera rejects every frame after the first `sends`
    pub fn fail_send_after(mut self, sends: usize) -> Self {
        self.fail_send_after = Some(sends);
        self
    }

    pub fn camera_unavailable(mut self) -> Self {
        self.camera_unavailable = true;
        self
    }

    /// Pace the camera in real time instead of returning immediately
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.stopper.clone()
    }

    pub fn emitted(&self) -> Vec<Frame> {
        self.observed.lock().emitted.clone()
    }

    pub fn reads(&self) -> usize {
        self.observed.lock().reads
    }

    pub fn source_closed(&self) -> bool {
        self.observed.lock().source_closed
    }

    pub fn camera_opened(&self) -> bool {
        self.observed.lock().camera_opened
    }

    pub fn camera_closed(&self) -> bool {
        self.observed.lock().camera_closed
    }
}

impl MediaBackend for FakeBackend {
    fn open_source(&self, _path: &Path) -> Result<Box<dyn FrameSource>, VideoError> {
        Ok(Box::new(FakeSource {
            info: ClipInfo {
                width: 1,
                height: 1,
                fps: self.fps,
            },
            frames: self.frames,
            position: 0,
            fail_read_after: self.fail_read_after,
            observed: self.observed.clone(),
        }))
    }

    fn open_camera(&self, clip: &ClipInfo) -> Result<Box<dyn VirtualCamera>, CameraError> {
        if self.camera_unavailable {
            return Err(CameraError::Unavailable("/dev/video99".into()));
        }
        self.observed.lock().camera_opened = true;
        Ok(Box::new(FakeCamera {
            pacer: self.paced.then(|| FramePacer::new(clip.fps)),
            stop_after: self.stop_after,
            fail_send_after: self.fail_send_after,
            stopper: self.stopper.clone(),
            observed: self.observed.clone(),
        }))
    }
}

struct FakeSource {
    info: ClipInfo,
    frames: usize,
    position: usize,
    fail_read_after: Option<usize>,
    observed: Arc<Mutex<Observed>>,
}

impl FrameSource for FakeSource {
    fn info(&self) -> &ClipInfo {
        &self.info
    }

    fn read(&mut self) -> Result<Option<Frame>, VideoError> {
        let mut observed = self.observed.lock();
        observed.reads += 1;
        if self.fail_read_after.is_some_and(|limit| observed.reads > limit) {
            return Err(VideoError::Gst("decoder went away".into()));
        }
        if self.position >= self.frames {
            return Ok(None);
        }
        self.position += 1;
        Ok(Some(tagged((self.position - 1) as u8)))
    }

    fn seek_to_start(&mut self) -> Result<(), VideoError> {
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<(), VideoError> {
        self.observed.lock().source_closed = true;
        Ok(())
    }
}

struct FakeCamera {
    pacer: Option<FramePacer>,
    stop_after: Option<usize>,
    fail_send_after: Option<usize>,
    stopper: CancellationToken,
    observed: Arc<Mutex<Observed>>,
}

impl VirtualCamera for FakeCamera {
    fn send(&mut self, frame: &Frame) -> Result<(), CameraError> {
        let mut observed = self.observed.lock();
        if self
            .fail_send_after
            .is_some_and(|limit| observed.emitted.len() >= limit)
        {
            return Err(CameraError::Push("sink went away".into()));
        }
        observed.emitted.push(frame.clone());
        if self.stop_after.is_some_and(|n| observed.emitted.len() >= n) {
            self.stopper.cancel();
        }
        Ok(())
    }

    fn wait_next_slot(&mut self, cancel: &CancellationToken) -> bool {
        match &mut self.pacer {
            Some(pacer) => pacer.wait(cancel),
            None => !cancel.is_cancelled(),
        }
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.observed.lock().camera_closed = true;
        Ok(())
    }
}

/// Control plane that records every command except status polls
#[derive(Default)]
pub struct FakeControl {
    calls: Mutex<Vec<&'static str>>,
    active: Mutex<bool>,
    next_id: Mutex<u64>,
    fail_start: bool,
    fail_record_switch: bool,
    fail_playback_switch: bool,
    never_active: bool,
    stop_delay: Option<Duration>,
}

impl FakeControl {
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    /// `switch_to_record` fails (the call is still recorded)
    pub fn failing_record_switch() -> Self {
        Self {
            fail_record_switch: true,
            ..Self::default()
        }
    }

    /// `switch_to_playback` fails (the call is still recorded)
    pub fn failing_playback_switch() -> Self {
        Self {
            fail_playback_switch: true,
            ..Self::default()
        }
    }

    /// Recordings start but never report active
    pub fn never_active() -> Self {
        Self {
            never_active: true,
            ..Self::default()
        }
    }

    /// `stop_recording` blocks for `delay`, ignoring cancellation
    pub fn slow_stop(delay: Duration) -> Self {
        Self {
            stop_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

impl ControlPlane for FakeControl {
    fn switch_to_record(&self) -> Result<(), ControlError> {
        self.calls.lock().push("switch_to_record");
        if self.fail_record_switch {
            return Err(ControlError::Command("scene switch rejected".into()));
        }
        Ok(())
    }

    fn switch_to_playback(&self) -> Result<(), ControlError> {
        self.calls.lock().push("switch_to_playback");
        if self.fail_playback_switch {
            return Err(ControlError::Command("scene switch rejected".into()));
        }
        Ok(())
    }

    fn start_recording(&self) -> Result<RecordingHandle, ControlError> {
        self.calls.lock().push("start_recording");
        if self.fail_start {
            return Err(ControlError::Connection("recorder offline".into()));
        }
        *self.active.lock() = true;
        let mut next_id = self.next_id.lock();
        *next_id += 1;
        Ok(RecordingHandle {
            id: *next_id,
            started_at: Instant::now(),
        })
    }

    fn stop_recording(&self, _handle: RecordingHandle) -> Result<PathBuf, ControlError> {
        self.calls.lock().push("stop_recording");
        if let Some(delay) = self.stop_delay {
            std::thread::sleep(delay);
        }
        *self.active.lock() = false;
        Ok(PathBuf::from("take.mkv"))
    }

    fn is_recording_active(&self) -> bool {
        !self.never_active && *self.active.lock()
    }
}
