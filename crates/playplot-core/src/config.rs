//! Session configuration.
//!
//! `SessionConfig` is fixed at session construction and copied into every
//! worker's bootstrap payload. It deserializes from TOML/JSON with every
//! field optional, and a couple of settings can be overridden from the
//! environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable naming the worker executable for process isolation.
pub const WORKER_ENV: &str = "PLAYPLOT_WORKER";

/// Environment variable selecting the isolation mode (`thread` or `process`).
pub const ISOLATION_ENV: &str = "PLAYPLOT_ISOLATION";

/// Upper bound for `fps_target`.
const MAX_FPS: f64 = 1000.0;

// ============================================================================
// Isolation
// ============================================================================

/// How workers are isolated from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Each worker runs on a dedicated OS thread with its own runtime.
    #[default]
    Thread,
    /// Each worker runs in a child `playplot-worker` process.
    Process,
}

impl FromStr for Isolation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(Self::Thread),
            "process" => Ok(Self::Process),
            other => Err(ConfigError::InvalidEnv {
                var: ISOLATION_ENV,
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread => write!(f, "thread"),
            Self::Process => write!(f, "process"),
        }
    }
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Settings for a playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Stop the session when the last plot closes or the clip ends without looping.
    pub close_with_last_plot: bool,

    /// Target marker redraw rate in frames per second.
    pub fps_target: f64,

    /// Minimum sleep between worker loop iterations.
    #[serde(with = "duration_secs")]
    pub plot_min_sleep: Duration,

    /// Initial playback position in seconds.
    pub start_time: f64,

    /// Initial volume in `[0, 1]`.
    pub volume: f32,

    /// Loop playback at the end of the clip.
    pub looping: bool,

    /// Start playing immediately instead of paused.
    pub autoplay: bool,

    /// Directory receiving images written by `save_plot_images`.
    pub save_folder: PathBuf,

    /// Present worker errors to the user as they arrive.
    pub show_msg_box_on_error_in_other_process: bool,

    /// Worker isolation mode.
    pub isolation: Isolation,

    /// Worker executable for process isolation (defaults to the binary next to
    /// the current executable).
    pub worker_executable: Option<PathBuf>,

    /// How long a worker may take to acknowledge shutdown.
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,

    /// Capacity of each bounded control channel direction.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            close_with_last_plot: true,
            fps_target: 60.0,
            plot_min_sleep: Duration::from_millis(1),
            start_time: 0.0,
            volume: 0.8,
            looping: false,
            autoplay: false,
            save_folder: PathBuf::from("."),
            show_msg_box_on_error_in_other_process: false,
            isolation: Isolation::Thread,
            worker_executable: None,
            shutdown_timeout: Duration::from_secs(2),
            channel_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn close_with_last_plot(mut self, value: bool) -> Self {
        self.close_with_last_plot = value;
        self
    }

    pub fn fps_target(mut self, fps: f64) -> Self {
        self.fps_target = fps;
        self
    }

    pub fn plot_min_sleep(mut self, sleep: Duration) -> Self {
        self.plot_min_sleep = sleep;
        self
    }

    pub fn start_time(mut self, seconds: f64) -> Self {
        self.start_time = seconds;
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }

    pub fn save_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.save_folder = folder.into();
        self
    }

    pub fn show_msg_box_on_error_in_other_process(mut self, value: bool) -> Self {
        self.show_msg_box_on_error_in_other_process = value;
        self
    }

    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn worker_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_executable = Some(path.into());
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Applies `PLAYPLOT_WORKER` and `PLAYPLOT_ISOLATION` if set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnv` for an unknown isolation mode.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(WORKER_ENV) {
            if !path.is_empty() {
                self.worker_executable = Some(PathBuf::from(path));
            }
        }
        if let Ok(mode) = std::env::var(ISOLATION_ENV) {
            self.isolation = mode.parse()?;
        }
        Ok(self)
    }

    /// Interval between marker redraws.
    pub fn frame_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.fps_target)
            .unwrap_or(self.plot_min_sleep)
            .max(self.plot_min_sleep)
    }

    /// Checks every field against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError::InvalidValue` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fps_target.is_finite() && self.fps_target > 0.0 && self.fps_target <= MAX_FPS) {
            return Err(invalid("fps_target", self.fps_target, "a rate in (0, 1000]"));
        }
        if self.plot_min_sleep.is_zero() {
            return Err(invalid(
                "plot_min_sleep",
                format!("{:?}", self.plot_min_sleep),
                "a positive duration",
            ));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(invalid("volume", self.volume, "a value in [0, 1]"));
        }
        if !(self.start_time.is_finite() && self.start_time >= 0.0) {
            return Err(invalid("start_time", self.start_time, "a non-negative time"));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(invalid(
                "shutdown_timeout",
                format!("{:?}", self.shutdown_timeout),
                "a positive duration",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity", 0, "at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: value.to_string(),
        expected,
    }
}

/// Serializes a `Duration` as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 || secs > u64::MAX as f64 / 1e9 {
            return Err(de::Error::custom(format!("invalid duration: {secs} seconds")));
        }
        // Round to whole nanoseconds so decimal inputs like 0.001 stay exact.
        Ok(Duration::from_nanos((secs * 1e9).round() as u64))
    }
}
