//! GStreamer initialization
//!
//! GStreamer must be initialized once before any pipeline is built. Failure is
//! logged rather than fatal so the binary can still report a useful error when
//! the first pipeline fails to build.

use std::sync::Once;

static GSTREAMER_INIT: Once = Once::new();

/// Elements the capture, decode and virtual camera pipelines need
const REQUIRED_ELEMENTS: &[&str] = &[
    "filesrc",
    "decodebin",
    "videoconvert",
    "appsink",
    "appsrc",
    "v4l2sink",
    "jpegenc",
    "matroskamux",
    "filesink",
];

/// Initialize GStreamer (idempotent)
pub fn init_gstreamer() {
    GSTREAMER_INIT.call_once(|| match gstreamer::init() {
        Ok(_) => {
            log::info!("GStreamer initialized successfully");
            log_gstreamer_version();
            let missing = missing_elements();
            if !missing.is_empty() {
                log::warn!("Missing GStreamer elements: {}", missing.join(", "));
            }
        }
        Err(e) => {
            log::error!("Failed to initialize GStreamer: {}", e);
            log::error!("Recording and playback will not be available");
        }
    });
}

fn log_gstreamer_version() {
    let (major, minor, micro, nano) = gstreamer::version();
    let nano_str = match nano {
        0 => String::new(),
        1 => " (CVS)".to_string(),
        2 => " (prerelease)".to_string(),
        _ => format!(" (nano: {})", nano),
    };
    log::info!("GStreamer version: {}.{}.{}{}", major, minor, micro, nano_str);
}

/// Check if GStreamer is available and properly configured
pub fn is_gstreamer_available() -> bool {
    gstreamer::init().is_ok()
}

/// Required elements with no registered factory
pub fn missing_elements() -> Vec<&'static str> {
    REQUIRED_ELEMENTS
        .iter()
        .copied()
        .filter(|name| gstreamer::ElementFactory::find(name).is_none())
        .collect()
}
