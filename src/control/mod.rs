// Recording control plane
//
// The session orchestrator commands recording and output routing through the
// `ControlPlane` trait. `GstRecorder` is a local implementation that captures
// straight from a camera with GStreamer; other implementations can drive an
// external switcher or recorder instead.

pub mod gst_recorder;

pub use gst_recorder::GstRecorder;

use std::path::PathBuf;
use std::time::Instant;

/// Token for a recording in progress
#[derive(Debug)]
pub struct RecordingHandle {
    pub id: u64,
    pub started_at: Instant,
}

/// Routing and recording commands used at stage boundaries
pub trait ControlPlane: Send + Sync {
    /// Route the live camera to the output (idle / recording layout)
    fn switch_to_record(&self) -> Result<(), ControlError>;

    /// Route the virtual camera playback to the output
    fn switch_to_playback(&self) -> Result<(), ControlError>;

    fn start_recording(&self) -> Result<RecordingHandle, ControlError>;

    /// Finish the recording and return the path of the finished clip
    fn stop_recording(&self, handle: RecordingHandle) -> Result<PathBuf, ControlError>;

    fn is_recording_active(&self) -> bool;
}

/// Error type for control plane commands
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Control plane unavailable: {0}")]
    Connection(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("GStreamer error: {0}")]
    Gst(String),

    #[error("No recording with id {0} is in progress")]
    UnknownRecording(u64),

    #[error("Recording produced no file at {0:?}")]
    NoOutput(PathBuf),
}
