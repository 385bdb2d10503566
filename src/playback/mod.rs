// Degraded playback engine
//
// The scheduler reads the recorded clip, runs every frame through the
// degradation model and the lag buffer, and paces the result out to the
// virtual camera until the session is cancelled.

pub mod degrade;
pub mod lag;
pub mod scheduler;

pub use degrade::{DegradationModel, DegradationState, Degraded};
pub use lag::{lag_capacity, LagBuffer};
pub use scheduler::{PlaybackPhase, PlaybackReport, PlaybackScheduler};

use std::path::Path;

use crate::camera::{CameraError, GstVirtualCamera, VirtualCamera};
use crate::control::ControlError;
use crate::video::{ClipInfo, FrameSource, GstClipSource, VideoError};

/// Opens the clip reader and the camera output for a playback stage
pub trait MediaBackend: Send + Sync {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, VideoError>;

    fn open_camera(&self, clip: &ClipInfo) -> Result<Box<dyn VirtualCamera>, CameraError>;
}

/// GStreamer decoding into a v4l2loopback camera
pub struct GstMediaBackend {
    camera_device: String,
    default_fps: f64,
}

impl GstMediaBackend {
    pub fn new(camera_device: String, default_fps: f64) -> Self {
        Self {
            camera_device,
            default_fps,
        }
    }
}

impl MediaBackend for GstMediaBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, VideoError> {
        Ok(Box::new(GstClipSource::open(path, self.default_fps)?))
    }

    fn open_camera(&self, clip: &ClipInfo) -> Result<Box<dyn VirtualCamera>, CameraError> {
        Ok(Box::new(GstVirtualCamera::open(&self.camera_device, clip)?))
    }
}

/// Fatal playback failure
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Clip error: {0}")]
    Video(#[from] VideoError),

    #[error("Virtual camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Control plane error: {0}")]
    Control(#[from] ControlError),
}
