// Countdown and recording stages
//
// Both stages sleep on the session's cancellation token, so a stop request
// interrupts them within one tick.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::control::{ControlError, ControlPlane, RecordingHandle};
use crate::notifications::{Notifier, ProgressEvent};

/// Interval between recording progress events
const RECORDING_TICK: Duration = Duration::from_millis(100);

/// What a stage needs from its session
pub struct StageContext<'a> {
    pub config: &'a Config,
    pub control: &'a dyn ControlPlane,
    pub notifier: &'a dyn Notifier,
    pub cancel: &'a CancellationToken,
}

/// Count down one event per second, ending with 0.
///
/// Returns `false` if cancelled, in which case the final 0 is not sent.
pub fn countdown(ctx: &StageContext<'_>) -> bool {
    for remaining in (1..=ctx.config.countdown_secs).rev() {
        ctx.notifier.notify(ProgressEvent::Countdown(remaining));
        if !ctx.cancel.sleep(Duration::from_secs(1)) {
            log::info!("Countdown cancelled at {}", remaining);
            return false;
        }
    }
    ctx.notifier.notify(ProgressEvent::Countdown(0));
    true
}

/// Record one take.
///
/// Returns the clip path, or `None` when cancelled. Once the recorder has
/// started it is always stopped again, cancelled or not.
pub fn record(ctx: &StageContext<'_>) -> Result<Option<PathBuf>, ControlError> {
    if ctx.cancel.is_cancelled() {
        return Ok(None);
    }

    if let Err(e) = ctx.control.switch_to_record() {
        log::warn!("Failed to switch to record routing: {}", e);
    }

    let handle = ctx.control.start_recording()?;

    if !wait_until_active(ctx) {
        finish_quietly(ctx, handle);
        return Ok(None);
    }

    let duration = Duration::from_secs(ctx.config.record_secs as u64);
    let started = Instant::now();
    log::info!("Recording for {}s", ctx.config.record_secs);

    // The timer is joined before the scope returns, so its last event always
    // precedes the end of the stage
    let completed = thread::scope(|scope| {
        scope.spawn(|| recording_timer(ctx.notifier, ctx.cancel, started, duration));
        ctx.cancel.sleep(duration)
    });

    let clip = ctx.control.stop_recording(handle)?;
    if completed {
        Ok(Some(clip))
    } else {
        log::info!("Recording cancelled, discarding {:?}", clip);
        Ok(None)
    }
}

/// Poll until the recorder reports active. `false` means cancelled first.
///
/// There is no deadline; a recorder that never starts holds the stage until
/// the session is stopped.
fn wait_until_active(ctx: &StageContext<'_>) -> bool {
    let poll = Duration::from_millis(ctx.config.record_poll_ms.max(1));
    let mut polls = 0u64;

    while !ctx.control.is_recording_active() {
        polls += 1;
        if polls % 100 == 0 {
            log::debug!("Still waiting for the recorder to become active");
        }
        if !ctx.cancel.sleep(poll) {
            return false;
        }
    }
    true
}

fn finish_quietly(ctx: &StageContext<'_>, handle: RecordingHandle) {
    if let Err(e) = ctx.control.stop_recording(handle) {
        log::warn!("Failed to stop recording: {}", e);
    }
}

/// Emit the remaining recording time every tick, then a final 0
fn recording_timer(
    notifier: &dyn Notifier,
    cancel: &CancellationToken,
    started: Instant,
    duration: Duration,
) {
    loop {
        let elapsed = started.elapsed();
        if elapsed >= duration {
            break;
        }
        let remaining = (duration - elapsed).as_secs_f64();
        notifier.notify(ProgressEvent::Recording((remaining * 10.0).round() / 10.0));
        if !cancel.sleep(RECORDING_TICK) {
            break;
        }
    }
    notifier.notify(ProgressEvent::Recording(0.0));
}
