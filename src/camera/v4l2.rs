// v4l2loopback virtual camera
//
// Pipeline: appsrc (video/x-raw, BGR) → videoconvert → v4l2sink
//
// The loopback device must already exist (`modprobe v4l2loopback`). Frames are
// pushed with synthetic timestamps; real-time pacing comes from `FramePacer`,
// so the sink itself runs unsynchronised.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::{CameraError, FramePacer, VirtualCamera};
use crate::cancel::CancellationToken;
use crate::video::{fps_to_gst_fraction, ClipInfo, Frame, CHANNELS};

pub struct GstVirtualCamera {
    device: String,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    video_info: gst_video::VideoInfo,
    pacer: FramePacer,
    frame_duration: gst::ClockTime,
    frames_sent: u64,
    closed: bool,
}

impl GstVirtualCamera {
    /// Open the loopback device for frames of the clip's size and rate
    pub fn open(device: &str, clip: &ClipInfo) -> Result<Self, CameraError> {
        if !std::path::Path::new(device).exists() {
            return Err(CameraError::Unavailable(format!(
                "{} does not exist (is v4l2loopback loaded?)",
                device
            )));
        }

        gst::init().map_err(|e| CameraError::Gst(e.to_string()))?;

        let video_info =
            gst_video::VideoInfo::builder(gst_video::VideoFormat::Bgr, clip.width, clip.height)
                .fps(fps_to_gst_fraction(clip.fps))
                .build()
                .map_err(|e| CameraError::Gst(format!("Invalid video info: {}", e)))?;
        let caps = video_info
            .to_caps()
            .map_err(|e| CameraError::Gst(format!("Failed to build caps: {}", e)))?;

        let pipeline = gst::Pipeline::new();

        let appsrc = gst_app::AppSrc::builder()
            .name("camera")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| CameraError::Gst(format!("Failed to create videoconvert: {}", e)))?;

        let v4l2sink = gst::ElementFactory::make("v4l2sink")
            .property("device", device)
            .property("sync", false)
            .build()
            .map_err(|e| CameraError::Gst(format!("Failed to create v4l2sink: {}", e)))?;

        pipeline
            .add_many([appsrc.upcast_ref(), &videoconvert, &v4l2sink])
            .map_err(|e| CameraError::Gst(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([appsrc.upcast_ref(), &videoconvert, &v4l2sink])
            .map_err(|e| CameraError::Gst(format!("Failed to link elements: {}", e)))?;

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            let _ = pipeline.set_state(gst::State::Null);
            CameraError::Unavailable(format!("{}: {:?}", device, e))
        })?;

        log::info!(
            "Virtual camera {} opened at {}x{} @ {:.2} fps",
            device,
            clip.width,
            clip.height,
            clip.fps
        );

        Ok(Self {
            device: device.to_string(),
            pipeline,
            appsrc,
            video_info,
            pacer: FramePacer::new(clip.fps),
            frame_duration: gst::ClockTime::from_nseconds(
                (1_000_000_000.0 / clip.fps).round() as u64,
            ),
            frames_sent: 0,
            closed: false,
        })
    }

    /// Lay a packed frame out with the row stride GStreamer expects for BGR
    fn to_buffer(&self, frame: &Frame) -> gst::Buffer {
        let row_len = frame.width() as usize * CHANNELS;
        let stride = self.video_info.stride()[0] as usize;
        if stride == row_len {
            return gst::Buffer::from_slice(frame.data().to_vec());
        }

        let mut padded = vec![0u8; stride * frame.height() as usize];
        for (dst, src) in padded
            .chunks_mut(stride)
            .zip(frame.data().chunks(row_len))
        {
            dst[..row_len].copy_from_slice(src);
        }
        gst::Buffer::from_slice(padded)
    }

    /// Surface a pending sink error, if any
    fn pending_error(&self) -> Option<CameraError> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop() {
            if let gst::MessageView::Error(err) = msg.view() {
                return Some(CameraError::Gst(format!(
                    "Pipeline error: {} ({:?})",
                    err.error(),
                    err.debug()
                )));
            }
        }
        None
    }
}

impl VirtualCamera for GstVirtualCamera {
    fn send(&mut self, frame: &Frame) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::Closed);
        }
        if frame.width() != self.video_info.width() || frame.height() != self.video_info.height() {
            return Err(CameraError::FrameSize {
                width: self.video_info.width(),
                height: self.video_info.height(),
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
        if let Some(err) = self.pending_error() {
            return Err(err);
        }

        let mut buffer = self.to_buffer(frame);
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| CameraError::Push("buffer is shared".into()))?;
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(
                self.frame_duration.nseconds() * self.frames_sent,
            ));
            buffer_ref.set_duration(self.frame_duration);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| CameraError::Push(format!("{:?}", e)))?;
        self.frames_sent += 1;
        Ok(())
    }

    fn wait_next_slot(&mut self, cancel: &CancellationToken) -> bool {
        self.pacer.wait(cancel)
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.appsrc.end_of_stream() {
            log::debug!("Virtual camera EOS not accepted: {:?}", e);
        }
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| CameraError::Gst(format!("Failed to stop camera: {:?}", e)))?;
        log::info!(
            "Virtual camera {} closed after {} frames",
            self.device,
            self.frames_sent
        );
        Ok(())
    }
}

impl Drop for GstVirtualCamera {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
