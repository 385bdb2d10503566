// Session orchestrator
//
// Owns the session state and the per-session cancellation token. Each start
// spawns one worker thread that runs countdown → record → playback. Stop
// cancels the token and waits a bounded grace period for the worker; past the
// grace period the worker is abandoned (it may still hold its camera or clip
// until it notices the cancellation) and the state is forced back to Idle.
//
// Every status write from a worker is tagged with its session id, so an
// abandoned worker cannot overwrite the state of a newer session.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

use super::stages::{self, StageContext};
use super::{SessionError, SessionState, SessionStatus};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::control::ControlPlane;
use crate::notifications::{Notifier, ProgressEvent};
use crate::playback::{MediaBackend, PlaybackScheduler};

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The session wound down within the grace period
    Stopped,
    /// The grace period ran out and the worker was abandoned
    ForceStopped,
}

struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
    /// Disconnects when the worker exits
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Everything a session worker shares with the controller
#[derive(Clone)]
struct SessionShared {
    config: Config,
    control: Arc<dyn ControlPlane>,
    backend: Arc<dyn MediaBackend>,
    notifier: Arc<dyn Notifier>,
    status: Arc<RwLock<SessionStatus>>,
}

impl SessionShared {
    /// Update the state if `id` is still the current session and no stop is pending
    fn advance(&self, id: Uuid, state: SessionState) -> bool {
        let mut status = self.status.write();
        if status.session_id != Some(id) || status.state == SessionState::Stopping {
            return false;
        }
        status.state = state;
        true
    }

    fn run(&self, id: Uuid, cancel: &CancellationToken) -> Result<(), SessionError> {
        let ctx = StageContext {
            config: &self.config,
            control: self.control.as_ref(),
            notifier: self.notifier.as_ref(),
            cancel,
        };

        if !stages::countdown(&ctx) || !self.advance(id, SessionState::Recording) {
            return Ok(());
        }

        let Some(clip) = stages::record(&ctx)? else {
            return Ok(());
        };
        {
            let mut status = self.status.write();
            if status.session_id == Some(id) {
                status.clip_path = Some(clip.clone());
            }
        }

        if cancel.is_cancelled() || !self.advance(id, SessionState::Playing) {
            return Ok(());
        }

        let mut scheduler = PlaybackScheduler::new(
            &self.config.playback,
            self.config.effects.clone(),
            StdRng::from_entropy(),
        );
        scheduler.run(self.backend.as_ref(), &clip, self.control.as_ref(), cancel)?;
        Ok(())
    }

    /// Worker thread body
    fn work(&self, id: Uuid, cancel: CancellationToken) {
        log::info!("Session {} started", id);
        let result = self.run(id, &cancel);

        let mut status = self.status.write();
        let current = status.session_id == Some(id);
        match result {
            Ok(()) => log::info!("Session {} finished", id),
            Err(e) => {
                log::error!("Session {} failed: {}", id, e);
                self.notifier.notify(ProgressEvent::Error(e.to_string()));
                if current {
                    status.last_error = Some(e.to_string());
                }
            }
        }
        if current {
            status.state = SessionState::Idle;
            status.session_id = None;
        }
    }
}

pub struct SessionController {
    shared: SessionShared,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    pub fn new(
        config: Config,
        control: Arc<dyn ControlPlane>,
        backend: Arc<dyn MediaBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            shared: SessionShared {
                config,
                control,
                backend,
                notifier,
                status: Arc::new(RwLock::new(SessionStatus::new())),
            },
            active: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status.read().clone()
    }

    /// Start a session. Rejected while another session is active.
    pub fn start(&self) -> Result<Uuid, SessionError> {
        let mut active = self.active.lock();

        {
            let status = self.shared.status.read();
            if !status.is_idle() {
                return Err(SessionError::AlreadyRunning(status.state));
            }
        }
        // A finished worker has already reset the state; reap it
        if let Some(finished) = active.take() {
            let _ = finished.handle.join();
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut status = self.shared.status.write();
            status.state = SessionState::Countdown;
            status.session_id = Some(id);
            status.started_at = Some(chrono::Utc::now());
            status.last_error = None;
        }

        let (done_tx, done) = crossbeam_channel::bounded::<()>(0);
        let shared = self.shared.clone();
        let worker_cancel = cancel.clone();
        let spawned = std::thread::Builder::new()
            .name("lagcam-session".into())
            .spawn(move || {
                let _done = done_tx;
                shared.work(id, worker_cancel);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let mut status = self.shared.status.write();
                status.state = SessionState::Idle;
                status.session_id = None;
                return Err(SessionError::Spawn(e));
            }
        };

        *active = Some(ActiveSession {
            id,
            cancel,
            done,
            handle,
        });
        Ok(id)
    }

    /// Stop the active session, waiting at most the configured grace period.
    ///
    /// The control plane is put back to record routing afterwards either way.
    pub fn stop(&self) -> Result<StopOutcome, SessionError> {
        let mut active = self.active.lock();

        let session = match active.take() {
            Some(session) if !self.shared.status.read().is_idle() => session,
            finished => {
                if let Some(finished) = finished {
                    let _ = finished.handle.join();
                }
                return Err(SessionError::NotRunning);
            }
        };

        log::info!("Stopping session {}", session.id);
        {
            let mut status = self.shared.status.write();
            if status.session_id == Some(session.id) {
                status.state = SessionState::Stopping;
            }
        }
        session.cancel.cancel();
        self.shared.notifier.notify(ProgressEvent::Countdown(0));
        self.shared.notifier.notify(ProgressEvent::Recording(0.0));

        let grace = Duration::from_secs(self.shared.config.stop_grace_secs as u64);
        let outcome = match session.done.recv_timeout(grace) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Session {} did not stop within {:?}; abandoning its worker",
                    session.id,
                    grace
                );
                StopOutcome::ForceStopped
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = session.handle.join();
                log::info!("Session {} stopped", session.id);
                StopOutcome::Stopped
            }
        };

        {
            let mut status = self.shared.status.write();
            if status.session_id == Some(session.id) || outcome == StopOutcome::ForceStopped {
                status.state = SessionState::Idle;
                status.session_id = None;
            }
        }

        self.reset_routing();
        Ok(outcome)
    }

    /// Put the control plane back to its idle routing (best effort)
    fn reset_routing(&self) {
        if let Err(e) = self.shared.control.switch_to_record() {
            log::warn!("Failed to reset routing: {}", e);
        }
    }

    /// Stop whatever is running and restore routing
    pub fn shutdown(&self) {
        match self.stop() {
            Ok(outcome) => log::info!("Shutdown: {:?}", outcome),
            Err(SessionError::NotRunning) => self.reset_routing(),
            Err(e) => log::warn!("Shutdown: {}", e),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(session) = self.active.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::ChannelNotifier;
    use crate::testing::{FakeBackend, FakeControl};
    use std::path::PathBuf;
    use std::time::Instant;

    fn config(countdown_secs: u32, record_secs: u32, stop_grace_secs: u32) -> Config {
        Config {
            countdown_secs,
            record_secs,
            stop_grace_secs,
            record_poll_ms: 5,
            ..Config::default()
        }
    }

    fn controller(
        config: Config,
        control: Arc<FakeControl>,
        backend: Arc<FakeBackend>,
    ) -> (SessionController, Receiver<ProgressEvent>) {
        let (notifier, rx) = ChannelNotifier::bounded(1024);
        let controller = SessionController::new(config, control, backend, Arc::new(notifier));
        (controller, rx)
    }

    fn wait_for(controller: &SessionController, state: SessionState, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if controller.status().state == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn stop_during_countdown_never_records() {
        let control = Arc::new(FakeControl::default());
        let backend = Arc::new(FakeBackend::new(10, 30.0).paced());
        let (controller, _rx) = controller(config(3, 10, 5), control.clone(), backend);

        controller.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(controller.status().state, SessionState::Countdown);

        let start = Instant::now();
        assert_eq!(controller.stop().unwrap(), StopOutcome::Stopped);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(controller.status().is_idle());
        assert!(!control.calls().contains(&"start_recording"));
    }

    #[test]
    fn only_one_session_at_a_time() {
        let control = Arc::new(FakeControl::default());
        let backend = Arc::new(FakeBackend::new(10, 30.0).paced());
        let (controller, _rx) = controller(config(3, 10, 5), control, backend);

        controller.start().unwrap();
        assert!(matches!(
            controller.start(),
            Err(SessionError::AlreadyRunning(SessionState::Countdown))
        ));
        controller.stop().unwrap();
        controller.start().unwrap();
        controller.stop().unwrap();
    }

    #[test]
    fn stop_without_session_is_rejected() {
        let control = Arc::new(FakeControl::default());
        let backend = Arc::new(FakeBackend::new(10, 30.0));
        let (controller, _rx) = controller(config(3, 10, 5), control, backend);
        assert!(matches!(controller.stop(), Err(SessionError::NotRunning)));
    }

    #[test]
    fn failed_routing_reset_does_not_fail_the_stop() {
        let control = Arc::new(FakeControl::failing_record_switch());
        let backend = Arc::new(FakeBackend::new(10, 30.0).paced());
        let (controller, _rx) = controller(config(3, 10, 5), control.clone(), backend);

        controller.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(controller.stop().unwrap(), StopOutcome::Stopped);
        assert!(controller.status().is_idle());
        assert_eq!(control.calls(), vec!["switch_to_record"]);
    }

    #[test]
    fn shutdown_stops_the_session_and_restores_routing() {
        let control = Arc::new(FakeControl::default());
        let backend = Arc::new(FakeBackend::new(30, 30.0).paced());
        let (controller, _rx) = controller(config(0, 1, 5), control.clone(), backend.clone());

        controller.start().unwrap();
        assert!(wait_for(&controller, SessionState::Playing, Duration::from_secs(3)));
        std::thread::sleep(Duration::from_millis(100));

        controller.shutdown();
        assert!(controller.status().is_idle());
        assert!(backend.camera_closed());
        assert!(backend.source_closed());
        assert_eq!(control.calls().last(), Some(&"switch_to_record"));
    }

    #[test]
    fn shutdown_when_idle_still_restores_routing() {
        let control = Arc::new(FakeControl::default());
        let backend = Arc::new(FakeBackend::new(10, 30.0));
        let (controller, _rx) = controller(config(3, 10, 5), control.clone(), backend);

        controller.shutdown();
        assert_eq!(control.calls(), vec!["switch_to_record"]);
    }

    #[test]
    fn full_session_records_then_plays() {
        let control = Arc::new(FakeControl::default());
        let backend = Arc::new(FakeBackend::new(30, 30.0).paced());
        let (controller, rx) = controller(config(0, 1, 5), control.clone(), backend.clone());

        controller.start().unwrap();
        assert!(wait_for(&controller, SessionState::Playing, Duration::from_secs(3)));
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(controller.status().clip_path, Some(PathBuf::from("take.mkv")));

        assert_eq!(controller.stop().unwrap(), StopOutcome::Stopped);
        assert!(controller.status().is_idle());
        assert!(!backend.emitted().is_empty());
        assert!(backend.camera_closed());
        assert_eq!(
            control.calls(),
            vec![
                "switch_to_record",
                "start_recording",
                "stop_recording",
                "switch_to_playback",
                "switch_to_record",
                "switch_to_record",
            ]
        );

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events[0], ProgressEvent::Countdown(0));
        let last_recording_tick = events
            .iter()
            .position(|e| *e == ProgressEvent::Recording(0.0))
            .unwrap();
        assert!(events[1..last_recording_tick]
            .iter()
            .all(|e| matches!(e, ProgressEvent::Recording(_))));
    }

    #[test]
    fn playback_error_returns_to_idle_and_reports() {
        let control = Arc::new(FakeControl::default());
        let backend = Arc::new(FakeBackend::new(0, 30.0));
        let (controller, rx) = controller(config(0, 0, 5), control, backend);

        controller.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(wait_for(&controller, SessionState::Idle, Duration::from_secs(2)));

        let status = controller.status();
        assert!(status.last_error.is_some());
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, ProgressEvent::Error(_))));

        // Nothing left behind blocks the next start
        controller.start().unwrap();
        let _ = controller.stop();
    }

    #[test]
    fn recording_error_returns_to_idle() {
        let control = Arc::new(FakeControl::failing_start());
        let backend = Arc::new(FakeBackend::new(10, 30.0));
        let (controller, _rx) = controller(config(0, 1, 5), control, backend);

        controller.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(wait_for(&controller, SessionState::Idle, Duration::from_secs(2)));
        assert!(controller
            .status()
            .last_error
            .unwrap()
            .contains("recorder offline"));
        assert!(matches!(controller.stop(), Err(SessionError::NotRunning)));
    }

    #[test]
    fn stuck_worker_is_abandoned_after_grace_period() {
        let control = Arc::new(FakeControl::slow_stop(Duration::from_millis(2500)));
        let backend = Arc::new(FakeBackend::new(10, 30.0).paced());
        let (controller, _rx) = controller(config(0, 0, 1), control, backend);

        controller.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        assert_eq!(controller.stop().unwrap(), StopOutcome::ForceStopped);
        assert!(start.elapsed() < Duration::from_millis(1800));
        assert!(controller.status().is_idle());

        // A new session starts right away and the old worker cannot clobber it
        let id = controller.start().unwrap();
        std::thread::sleep(Duration::from_millis(2000));
        assert_eq!(controller.status().session_id, Some(id));
        assert!(!controller.status().is_idle());
    }
}
