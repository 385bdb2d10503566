// Session management: countdown → record → degraded playback

pub mod orchestrator;
pub mod stages;

pub use orchestrator::{SessionController, StopOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::control::ControlError;
use crate::playback::PlaybackError;

/// Where the active session is
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Ready to start
    Idle,
    /// Counting down before recording
    Countdown,
    /// Camera take in progress
    Recording,
    /// Degraded playback on the virtual camera
    Playing,
    /// Stop requested, waiting for the session to wind down
    Stopping,
}

/// Snapshot returned by status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    /// Clip from the most recent take
    pub clip_path: Option<PathBuf>,
    /// Error that ended the most recent session, if any
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            started_at: None,
            clip_path: None,
            last_error: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for session control
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A session is already {0:?}")]
    AlreadyRunning(SessionState),

    #[error("No session is running")]
    NotRunning,

    #[error("Recording failed: {0}")]
    Recording(#[from] ControlError),

    #[error("Playback failed: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Failed to spawn session thread: {0}")]
    Spawn(#[from] std::io::Error),
}
