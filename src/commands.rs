// Session control commands

use crate::session::{SessionController, SessionError, SessionState, SessionStatus, StopOutcome};

// ============================================================================
// Session Commands
// ============================================================================

pub fn start_session(controller: &SessionController) -> Result<String, String> {
    match controller.start() {
        Ok(id) => Ok(format!("Session {} started", id)),
        Err(SessionError::AlreadyRunning(SessionState::Stopping)) => {
            Err("Session is stopping, please wait".to_string())
        }
        Err(SessionError::AlreadyRunning(_)) => Err("Session already running".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn stop_session(controller: &SessionController) -> Result<String, String> {
    match controller.stop() {
        Ok(StopOutcome::Stopped) => Ok("Session stopped".to_string()),
        Ok(StopOutcome::ForceStopped) => {
            Ok("Session did not stop in time and was abandoned".to_string())
        }
        Err(SessionError::NotRunning) => Err("No session is running".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn get_session_status(controller: &SessionController) -> SessionStatus {
    controller.status()
}

// ============================================================================
// Command Line Dispatch
// ============================================================================

/// One line of input on the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "status" => Some(Self::Status),
            "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Run one command, returning the reply line
pub fn execute(controller: &SessionController, command: Command) -> Result<String, String> {
    match command {
        Command::Start => start_session(controller),
        Command::Stop => stop_session(controller),
        Command::Status => serde_json::to_string(&get_session_status(controller))
            .map_err(|e| format!("Failed to serialize status: {}", e)),
        Command::Quit => {
            controller.shutdown();
            Ok("Bye".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notifications::ChannelNotifier;
    use crate::testing::{FakeBackend, FakeControl};
    use std::sync::Arc;

    fn controller() -> SessionController {
        let (notifier, _rx) = ChannelNotifier::bounded(16);
        SessionController::new(
            Config::default(),
            Arc::new(FakeControl::default()),
            Arc::new(FakeBackend::new(10, 30.0)),
            Arc::new(notifier),
        )
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse(" Start\n"), Some(Command::Start));
        assert_eq!(Command::parse("stop"), Some(Command::Stop));
        assert_eq!(Command::parse("status"), Some(Command::Status));
        assert_eq!(Command::parse("exit"), Some(Command::Quit));
        assert_eq!(Command::parse("record"), None);
    }

    #[test]
    fn start_and_stop_replies() {
        let controller = controller();
        assert!(start_session(&controller).unwrap().starts_with("Session "));
        assert_eq!(start_session(&controller).unwrap_err(), "Session already running");
        assert_eq!(stop_session(&controller).unwrap(), "Session stopped");
        assert_eq!(stop_session(&controller).unwrap_err(), "No session is running");
    }

    #[test]
    fn status_is_json() {
        let controller = controller();
        let reply = execute(&controller, Command::Status).unwrap();
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["state"], "idle");
        assert!(value["session_id"].is_null());
    }
}
