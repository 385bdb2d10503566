// Configuration management for Lagcam

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Where the recorded clip is written and played back from
    pub clip_path: PathBuf,

    /// Length of the recorded take in seconds
    pub record_secs: u32,

    /// Countdown before recording starts, in seconds
    pub countdown_secs: u32,

    /// How long a stop request waits for the session to wind down
    pub stop_grace_secs: u32,

    /// Poll interval while waiting for the recorder to become active
    pub record_poll_ms: u64,

    /// Capture device for recording (e.g. "/dev/video0").
    /// When unset, GStreamer picks a camera automatically.
    pub capture_device: Option<String>,

    /// v4l2loopback device used as the virtual camera
    pub camera_device: String,

    pub playback: PlaybackConfig,

    pub effects: EffectsConfig,
}

/// Lag buffer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Base delay between the clip and the virtual camera, in seconds
    pub base_lag_s: f64,

    /// Frame rate assumed when the clip does not report one
    pub default_fps: f64,
}

/// Probabilities and ranges for the simulated bad connection.
///
/// Probabilities are evaluated once per played frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EffectsConfig {
    pub freeze_prob: f64,
    pub freeze_min_s: f64,
    pub freeze_max_s: f64,

    pub downgrade_prob: f64,
    pub downgrade_scale_min: f64,
    pub downgrade_scale_max: f64,
    pub min_downgrade_frames: u32,
    pub max_downgrade_frames: u32,

    pub lag_prob: f64,
    /// Upper bound of duplicate pushes per lag spike
    pub max_extra_lag_frames: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clip_path: PathBuf::from("generated_video.mkv"),
            record_secs: 10,
            countdown_secs: 3,
            stop_grace_secs: 5,
            record_poll_ms: 50,
            capture_device: None,
            camera_device: "/dev/video10".to_string(),
            playback: PlaybackConfig::default(),
            effects: EffectsConfig::default(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            base_lag_s: 0.6,
            default_fps: 15.0,
        }
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            freeze_prob: 0.1,
            freeze_min_s: 0.1,
            freeze_max_s: 0.66,
            downgrade_prob: 0.59,
            downgrade_scale_min: 0.3,
            downgrade_scale_max: 1.0,
            min_downgrade_frames: 15,
            max_downgrade_frames: 240,
            lag_prob: 0.3,
            max_extra_lag_frames: 5,
        }
    }
}

impl EffectsConfig {
    /// Everything off: frames pass through untouched
    pub fn disabled() -> Self {
        Self {
            freeze_prob: 0.0,
            downgrade_prob: 0.0,
            lag_prob: 0.0,
            ..Self::default()
        }
    }
}

impl Config {
    /// Load config from disk or return default
    pub fn load_or_default(config_path: &Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(config) => return config.validated(),
                    Err(e) => {
                        log::warn!("Failed to parse config {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file {:?}: {}", config_path, e);
                }
            }
        }

        Self::default()
    }

    /// Replace settings that would break playback with their defaults
    fn validated(mut self) -> Self {
        let defaults = PlaybackConfig::default();
        if !(self.playback.default_fps.is_finite() && self.playback.default_fps > 0.0) {
            log::warn!(
                "Invalid playback.default_fps {}, using {}",
                self.playback.default_fps,
                defaults.default_fps
            );
            self.playback.default_fps = defaults.default_fps;
        }
        if !(self.playback.base_lag_s.is_finite() && self.playback.base_lag_s >= 0.0) {
            log::warn!(
                "Invalid playback.base_lag_s {}, using {}",
                self.playback.base_lag_s,
                defaults.base_lag_s
            );
            self.playback.base_lag_s = defaults.base_lag_s;
        }
        self
    }

    /// Save config to disk
    pub fn save(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(config_path, contents)?;

        Ok(())
    }
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lagcam")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("nope.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.record_secs = 4;
        config.capture_device = Some("/dev/video2".into());
        config.effects.freeze_prob = 1.0;
        config.save(&path).unwrap();

        assert_eq!(Config::load_or_default(&path), config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "record_secs = 3\n\n[effects]\nlag_prob = 0.0\n").unwrap();

        let config = Config::load_or_default(&path);
        assert_eq!(config.record_secs, 3);
        assert_eq!(config.effects.lag_prob, 0.0);
        assert_eq!(config.effects.freeze_prob, 0.1);
        assert_eq!(config.playback, PlaybackConfig::default());
    }

    #[test]
    fn non_positive_frame_rate_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        for fps in ["0.0", "-5.0"] {
            std::fs::write(&path, format!("[playback]\ndefault_fps = {}\nbase_lag_s = -1.0\n", fps))
                .unwrap();
            let config = Config::load_or_default(&path);
            assert_eq!(config.playback, PlaybackConfig::default());
        }
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "record_secs = \"ten\"").unwrap();
        assert_eq!(Config::load_or_default(&path), Config::default());
    }
}
