// Progress notifications
//
// One-way events for whoever drives the session (countdown ticks, recording
// time remaining, errors). Delivery never blocks the session and a full or
// disconnected channel is not an error.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;

/// Event sent to the notification channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", content = "value", rename_all = "lowercase")]
pub enum ProgressEvent {
    /// Seconds left before recording starts
    Countdown(u32),
    /// Seconds of recording left, to one decimal
    Recording(f64),
    Error(String),
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: ProgressEvent);
}

/// Bounded channel notifier; drops events when the consumer falls behind
pub struct ChannelNotifier {
    tx: Sender<ProgressEvent>,
}

impl ChannelNotifier {
    pub fn bounded(capacity: usize) -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: ProgressEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::debug!("Notification channel full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
