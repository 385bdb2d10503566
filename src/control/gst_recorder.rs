// Local camera recorder
//
// Pipeline: v4l2src (or autovideosrc) → videoconvert → jpegenc → matroskamux → filesink
//
// There is no external switcher in this setup, so routing commands only log.
// The clip is written straight to its final path; nothing is renamed afterwards.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use gstreamer as gst;
use gstreamer::prelude::*;

use super::{ControlError, ControlPlane, RecordingHandle};

/// How long to wait for the muxer to finalize the file after EOS
const FINALIZE_TIMEOUT_SECS: u64 = 5;

struct ActiveRecording {
    id: u64,
    pipeline: gst::Pipeline,
}

pub struct GstRecorder {
    clip_path: PathBuf,
    capture_device: Option<String>,
    active: Mutex<Option<ActiveRecording>>,
    next_id: AtomicU64,
}

impl GstRecorder {
    pub fn new(clip_path: PathBuf, capture_device: Option<String>) -> Self {
        Self {
            clip_path,
            capture_device,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn build_pipeline(&self) -> Result<gst::Pipeline, ControlError> {
        gst::init().map_err(|e| ControlError::Gst(e.to_string()))?;

        let pipeline = gst::Pipeline::new();

        let source = match &self.capture_device {
            Some(device) => gst::ElementFactory::make("v4l2src")
                .property("device", device.as_str())
                .build()
                .map_err(|e| ControlError::Gst(format!("Failed to create v4l2src: {}", e)))?,
            None => gst::ElementFactory::make("autovideosrc")
                .build()
                .map_err(|e| ControlError::Gst(format!("Failed to create autovideosrc: {}", e)))?,
        };

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| ControlError::Gst(format!("Failed to create videoconvert: {}", e)))?;

        let jpegenc = gst::ElementFactory::make("jpegenc")
            .property("quality", 90i32)
            .build()
            .map_err(|e| ControlError::Gst(format!("Failed to create jpegenc: {}", e)))?;

        let muxer = gst::ElementFactory::make("matroskamux")
            .property("writing-app", "Lagcam")
            .build()
            .map_err(|e| ControlError::Gst(format!("Failed to create matroskamux: {}", e)))?;

        let filesink = gst::ElementFactory::make("filesink")
            .property("location", self.clip_path.to_string_lossy().to_string())
            .property("async", false)
            .build()
            .map_err(|e| ControlError::Gst(format!("Failed to create filesink: {}", e)))?;

        pipeline
            .add_many([&source, &videoconvert, &jpegenc, &muxer, &filesink])
            .map_err(|e| ControlError::Gst(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([&source, &videoconvert, &jpegenc, &muxer, &filesink])
            .map_err(|e| ControlError::Gst(format!("Failed to link elements: {}", e)))?;

        Ok(pipeline)
    }

    /// Send EOS and wait for the muxer to finish writing
    fn finalize(recording: ActiveRecording) -> Result<(), ControlError> {
        let pipeline = recording.pipeline;
        let mut pipeline_error = None;

        if !pipeline.send_event(gst::event::Eos::new()) {
            log::warn!("Recorder {} did not accept EOS", recording.id);
        }

        if let Some(bus) = pipeline.bus() {
            for msg in bus.iter_timed(gst::ClockTime::from_seconds(FINALIZE_TIMEOUT_SECS)) {
                match msg.view() {
                    gst::MessageView::Eos(..) => break,
                    gst::MessageView::Error(err) => {
                        pipeline_error = Some(format!(
                            "Pipeline error: {} ({:?})",
                            err.error(),
                            err.debug()
                        ));
                        break;
                    }
                    _ => {}
                }
            }
        }

        // Always set pipeline to NULL before dropping
        let _ = pipeline.set_state(gst::State::Null);

        match pipeline_error {
            Some(e) => Err(ControlError::Gst(e)),
            None => Ok(()),
        }
    }
}

impl ControlPlane for GstRecorder {
    fn switch_to_record(&self) -> Result<(), ControlError> {
        log::info!("Routing: live camera");
        Ok(())
    }

    fn switch_to_playback(&self) -> Result<(), ControlError> {
        log::info!("Routing: virtual camera playback");
        Ok(())
    }

    fn start_recording(&self) -> Result<RecordingHandle, ControlError> {
        let mut active = self.active.lock();

        if let Some(stale) = active.take() {
            log::warn!("Stopping stale recording {} before starting a new one", stale.id);
            if let Err(e) = Self::finalize(stale) {
                log::warn!("Stale recording did not finish cleanly: {}", e);
            }
        }

        let pipeline = self.build_pipeline()?;
        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(ControlError::Command(format!(
                "Failed to start recorder: {:?}",
                e
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *active = Some(ActiveRecording { id, pipeline });

        log::info!("Recording {} started to {:?}", id, self.clip_path);
        Ok(RecordingHandle {
            id,
            started_at: Instant::now(),
        })
    }

    fn stop_recording(&self, handle: RecordingHandle) -> Result<PathBuf, ControlError> {
        let recording = {
            let mut active = self.active.lock();
            match active.take() {
                Some(recording) if recording.id == handle.id => recording,
                other => {
                    *active = other;
                    return Err(ControlError::UnknownRecording(handle.id));
                }
            }
        };

        Self::finalize(recording)?;

        if !self.clip_path.exists() {
            return Err(ControlError::NoOutput(self.clip_path.clone()));
        }

        log::info!(
            "Recording {} finished after {:.1}s",
            handle.id,
            handle.started_at.elapsed().as_secs_f64()
        );
        Ok(self.clip_path.clone())
    }

    fn is_recording_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .map(|recording| recording.pipeline.current_state() == gst::State::Playing)
            .unwrap_or(false)
    }
}

impl Drop for GstRecorder {
    fn drop(&mut self) {
        if let Some(recording) = self.active.get_mut().take() {
            let _ = recording.pipeline.set_state(gst::State::Null);
        }
    }
}
