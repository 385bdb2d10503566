// GStreamer clip decoder
//
// Pipeline: filesrc → decodebin → videoconvert → appsink (video/x-raw, BGR)
//
// decodebin picks the decoder for whatever the recorder produced. Frames are
// pulled synchronously from the appsink and repacked without stride padding
// so they match the layout the virtual camera expects.

use std::path::{Path, PathBuf};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_pbutils as gst_pbutils;
use gstreamer_video as gst_video;
use gstreamer_video::VideoFrameExt;

use super::{ClipInfo, Frame, FrameSource, VideoError, CHANNELS};

/// How long a single pull may block before it counts as a stall
const PULL_TIMEOUT_SECS: u64 = 5;

/// Decodes a clip file into BGR frames
pub struct GstClipSource {
    path: PathBuf,
    info: ClipInfo,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    closed: bool,
}

impl GstClipSource {
    /// Open a clip and preroll the decoder.
    ///
    /// `default_fps` is used when neither the decoded caps nor the container
    /// report a usable frame rate.
    pub fn open<P: AsRef<Path>>(path: P, default_fps: f64) -> Result<Self, VideoError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(VideoError::NotFound(path));
        }

        gst::init().map_err(|e| VideoError::Gst(e.to_string()))?;

        let pipeline = gst::Pipeline::new();

        let filesrc = gst::ElementFactory::make("filesrc")
            .property("location", path.to_string_lossy().to_string())
            .build()
            .map_err(|e| VideoError::Gst(format!("Failed to create filesrc: {}", e)))?;

        let decodebin = gst::ElementFactory::make("decodebin")
            .build()
            .map_err(|e| VideoError::Gst(format!("Failed to create decodebin: {}", e)))?;

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| VideoError::Gst(format!("Failed to create videoconvert: {}", e)))?;

        let caps = gst_video::VideoCapsBuilder::new()
            .format(gst_video::VideoFormat::Bgr)
            .build();

        let appsink = gst_app::AppSink::builder()
            .name("frames")
            .caps(&caps)
            .sync(false)
            .max_buffers(4)
            .build();

        pipeline
            .add_many([&filesrc, &decodebin, &videoconvert, appsink.upcast_ref()])
            .map_err(|e| VideoError::Gst(format!("Failed to add elements: {}", e)))?;

        filesrc
            .link(&decodebin)
            .map_err(|e| VideoError::Gst(format!("Failed to link filesrc to decodebin: {}", e)))?;

        videoconvert
            .link(&appsink)
            .map_err(|e| VideoError::Gst(format!("Failed to link videoconvert to appsink: {}", e)))?;

        let videoconvert_weak = videoconvert.downgrade();
        decodebin.connect_pad_added(move |_decodebin, src_pad| {
            let Some(videoconvert) = videoconvert_weak.upgrade() else {
                return;
            };

            let caps = src_pad
                .current_caps()
                .unwrap_or_else(|| src_pad.query_caps(None));
            let Some(structure) = caps.structure(0) else {
                return;
            };
            if !structure.name().as_str().starts_with("video/") {
                log::debug!("GstClipSource: ignoring pad with caps '{}'", structure.name());
                return;
            }
            let Some(sink_pad) = videoconvert.static_pad("sink") else {
                return;
            };
            if !sink_pad.is_linked() {
                if let Err(e) = src_pad.link(&sink_pad) {
                    log::warn!("GstClipSource: failed to link video pad: {:?}", e);
                }
            }
        });

        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| VideoError::Gst(format!("Failed to set pipeline to PAUSED: {:?}", e)))?;

        let mut source = Self {
            path,
            info: ClipInfo {
                width: 0,
                height: 0,
                fps: default_fps,
            },
            pipeline,
            appsink,
            closed: false,
        };

        // On error the pipeline is torn down by Drop
        source.wait_async_done()?;
        source.info = source.probe_info(default_fps)?;

        log::info!(
            "Opened clip {:?}: {}x{} @ {:.2} fps",
            source.path,
            source.info.width,
            source.info.height,
            source.info.fps
        );

        Ok(source)
    }

    fn wait_async_done(&self) -> Result<(), VideoError> {
        let Some(bus) = self.pipeline.bus() else {
            return Err(VideoError::Gst("Failed to get pipeline bus".into()));
        };
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(10)) {
            match msg.view() {
                gst::MessageView::AsyncDone(_) => return Ok(()),
                gst::MessageView::Error(err) => {
                    return Err(VideoError::Gst(format!(
                        "Pipeline error: {} ({:?})",
                        err.error(),
                        err.debug()
                    )));
                }
                _ => {}
            }
        }
        Err(VideoError::Timeout)
    }

    /// Read dimensions and frame rate from the prerolled sample
    fn probe_info(&self, default_fps: f64) -> Result<ClipInfo, VideoError> {
        let sample = self
            .appsink
            .try_pull_preroll(gst::ClockTime::from_seconds(PULL_TIMEOUT_SECS))
            .ok_or(VideoError::FirstFrame)?;
        let caps = sample
            .caps()
            .ok_or_else(|| VideoError::Gst("No caps on prerolled sample".into()))?;
        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| VideoError::Gst(format!("Unusable caps: {}", e)))?;

        let caps_fps = video_info.fps();
        let fps = if caps_fps.numer() > 0 && caps_fps.denom() > 0 {
            caps_fps.numer() as f64 / caps_fps.denom() as f64
        } else {
            probe_fps(&self.path).unwrap_or_else(|| {
                log::warn!(
                    "No frame rate reported for {:?}, using {} fps",
                    self.path,
                    default_fps
                );
                default_fps
            })
        };

        Ok(ClipInfo {
            width: video_info.width(),
            height: video_info.height(),
            fps,
        })
    }

    fn ensure_playing(&self) -> Result<(), VideoError> {
        if self.pipeline.current_state() != gst::State::Playing {
            self.pipeline
                .set_state(gst::State::Playing)
                .map_err(|e| VideoError::Gst(format!("Failed to set PLAYING: {:?}", e)))?;
        }
        Ok(())
    }

    /// Surface a pending pipeline error, if any
    fn pending_error(&self) -> Option<VideoError> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop() {
            if let gst::MessageView::Error(err) = msg.view() {
                return Some(VideoError::Gst(format!(
                    "Pipeline error: {} ({:?})",
                    err.error(),
                    err.debug()
                )));
            }
        }
        None
    }

    /// Copy a decoded sample into a tightly packed frame
    fn frame_from_sample(&self, sample: &gst::Sample) -> Result<Frame, VideoError> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| VideoError::Gst("No buffer in sample".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| VideoError::Gst("No caps on sample".into()))?;
        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| VideoError::Gst(format!("Unusable caps: {}", e)))?;

        let video_frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &video_info)
            .map_err(|e| VideoError::Gst(format!("Failed to map frame: {}", e)))?;
        let plane = video_frame
            .plane_data(0)
            .map_err(|e| VideoError::Gst(format!("Failed to read plane: {}", e)))?;

        let width = video_info.width();
        let height = video_info.height();
        let row_len = width as usize * CHANNELS;
        let stride = video_frame.plane_stride()[0] as usize;

        let mut data = Vec::with_capacity(row_len * height as usize);
        for row in plane.chunks(stride).take(height as usize) {
            data.extend_from_slice(&row[..row_len]);
        }

        Frame::new(width, height, data)
    }
}

impl FrameSource for GstClipSource {
    fn info(&self) -> &ClipInfo {
        &self.info
    }

    fn read(&mut self) -> Result<Option<Frame>, VideoError> {
        self.ensure_playing()?;

        match self
            .appsink
            .try_pull_sample(gst::ClockTime::from_seconds(PULL_TIMEOUT_SECS))
        {
            Some(sample) => self.frame_from_sample(&sample).map(Some),
            None if self.appsink.is_eos() => Ok(None),
            None => Err(self.pending_error().unwrap_or(VideoError::Timeout)),
        }
    }

    fn seek_to_start(&mut self) -> Result<(), VideoError> {
        self.pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::ClockTime::ZERO,
            )
            .map_err(|e| VideoError::Gst(format!("Seek failed: {:?}", e)))?;

        let Some(bus) = self.pipeline.bus() else {
            return Err(VideoError::Gst("Failed to get pipeline bus for seek".into()));
        };
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(2)) {
            match msg.view() {
                gst::MessageView::AsyncDone(_) => break,
                gst::MessageView::Error(err) => {
                    return Err(VideoError::Gst(format!("Seek error: {}", err.error())));
                }
                _ => {}
            }
        }

        log::debug!("Rewound clip {:?}", self.path);
        Ok(())
    }

    fn close(&mut self) -> Result<(), VideoError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| VideoError::Gst(format!("Failed to stop decoder: {:?}", e)))?;
        log::debug!("Closed clip {:?}", self.path);
        Ok(())
    }
}

impl Drop for GstClipSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Probe the clip's frame rate using GStreamer's discoverer
fn probe_fps(path: &Path) -> Option<f64> {
    let discoverer = gst_pbutils::Discoverer::new(gst::ClockTime::from_seconds(10)).ok()?;
    let uri = gst::glib::filename_to_uri(path, None).ok()?;
    let info = discoverer.discover_uri(&uri).ok()?;

    let video_streams = info.video_streams();
    let stream = video_streams.first()?;
    let fps = stream.framerate();
    if fps.numer() > 0 && fps.denom() > 0 {
        Some(fps.numer() as f64 / fps.denom() as f64)
    } else {
        None
    }
}
