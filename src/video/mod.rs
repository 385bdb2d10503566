// Video clip handling
//
// Frames, clip metadata and the `FrameSource` trait the playback scheduler reads
// from. `GstClipSource` is the GStreamer implementation that decodes the
// recorded clip into packed BGR frames.

pub mod gst_source;

pub use gst_source::GstClipSource;

use std::path::PathBuf;
use std::sync::Arc;

use gstreamer as gst;

/// Bytes per pixel of every frame (packed BGR)
pub const CHANNELS: usize = 3;

/// Information about the clip being played back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (frames per second), always positive
    pub fps: f64,
}

impl ClipInfo {
    /// Duration of one frame slot
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.fps)
    }

    /// Size in bytes of one packed frame
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }
}

/// One decoded video frame: packed BGR, row-major, no stride padding.
///
/// Pixel storage is shared, so cloning a frame is cheap and never copies pixels.
/// Effects that change pixels build a new frame instead of mutating this one.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, VideoError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(VideoError::FrameSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data: data.into(),
        })
    }

    /// All-zero (black) frame
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * CHANNELS].into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether both frames share the same pixel storage
    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// Sequential reader over a clip that can be rewound to loop it
pub trait FrameSource: Send {
    /// Clip metadata, fixed for the lifetime of the source
    fn info(&self) -> &ClipInfo;

    /// Read the next frame. `Ok(None)` means end of stream.
    fn read(&mut self) -> Result<Option<Frame>, VideoError>;

    /// Rewind to the first frame
    fn seek_to_start(&mut self) -> Result<(), VideoError>;

    /// Release the underlying decoder. Calling it twice is harmless.
    fn close(&mut self) -> Result<(), VideoError>;
}

/// Convert a floating point frame rate to a GStreamer fraction
pub fn fps_to_gst_fraction(fps: f64) -> gst::Fraction {
    // Common NTSC rates keep their exact 1001 denominators
    for base in [24u32, 30, 60] {
        let ntsc = base as f64 * 1000.0 / 1001.0;
        if (fps - ntsc).abs() < 0.01 {
            return gst::Fraction::new((base * 1000) as i32, 1001);
        }
    }
    if (fps - fps.round()).abs() < 0.001 {
        gst::Fraction::new(fps.round() as i32, 1)
    } else {
        gst::Fraction::new((fps * 1000.0).round() as i32, 1000)
    }
}

/// Error type for clip decoding
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Clip not found: {0}")]
    NotFound(PathBuf),

    #[error("GStreamer error: {0}")]
    Gst(String),

    #[error("Failed to read the first frame of the clip")]
    FirstFrame,

    #[error("Clip contains no frames")]
    EmptyClip,

    #[error("Timed out waiting for a decoded frame")]
    Timeout,

    #[error("Frame has {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
}
