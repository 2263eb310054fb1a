//! Engine configuration.
//!
//! [`EngineConfig`] is an immutable snapshot built once at startup: loaded
//! from a TOML or JSON file, merged with command-line/environment overrides,
//! validated, and then passed down by reference. Nothing in the engine reads
//! the environment or the file again mid-run.
//!
//! # Example config.toml
//!
//! ```toml
//! run_timeout = 120.0
//! interactive_timeout = 6.5
//! max_retries = 2
//! teaching_enabled = true
//! learning_window = 30.0
//! event_noise_mode = "debug"
//! learning_dir = ".pagepilot/learning"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PilotError, Result};

/// Default location of the project-local config file.
pub const DEFAULT_CONFIG_FILE: &str = ".pagepilot/config.toml";

/// Which observer events count as progress for the watchdog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventNoiseMode {
    /// Interaction, navigation, and DOM mutation events count.
    #[default]
    Default,
    /// The control agent runs with debug overlays that mutate the DOM and
    /// emit probes; only interaction and navigation events count.
    Debug,
}

impl std::fmt::Display for EventNoiseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

/// Serde adapter writing durations as fractional seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        if !raw.is_finite() || raw < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {raw}"
            )));
        }
        Ok(Duration::from_secs_f64(raw))
    }
}

/// Immutable engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard ceiling for the whole run.
    #[serde(with = "secs")]
    pub run_timeout: Duration,

    /// Hard ceiling for any single step, retries included.
    #[serde(with = "secs")]
    pub step_hard_timeout: Duration,

    /// Per-action timeout for wait steps.
    #[serde(with = "secs")]
    pub wait_timeout: Duration,

    /// Per-action timeout for interactive steps.
    #[serde(with = "secs")]
    pub interactive_timeout: Duration,

    /// Retry rounds after the first attempt.
    pub max_retries: u32,

    /// Stuck when the step signature has not changed for this long.
    #[serde(with = "secs")]
    pub stuck_step_threshold: Duration,

    /// Stuck when no useful progress has been observed for this long.
    #[serde(with = "secs")]
    pub stuck_interactive_threshold: Duration,

    /// Stuck when focus is trapped in a frame and no progress for this long.
    #[serde(with = "secs")]
    pub stuck_iframe_threshold: Duration,

    /// Release control to a human on stuck/timeout/not-found and learn from
    /// their correction.
    pub teaching_enabled: bool,

    /// How long to wait for the human's corrective click.
    #[serde(with = "secs")]
    pub learning_window: Duration,

    /// Sleep between observer polls inside the learning window.
    #[serde(with = "secs")]
    pub learning_poll_interval: Duration,

    /// Maximum time a single observer poll may take.
    #[serde(with = "secs")]
    pub observer_poll_ceiling: Duration,

    /// Vertical scroll applied between retry rounds.
    pub scroll_nudge_px: i64,

    /// Progress classification policy for observer events.
    pub event_noise_mode: EventNoiseMode,

    /// Directory holding the selector map and teaching audit records.
    pub learning_dir: PathBuf,

    /// Directory for screenshots.
    pub evidence_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(180),
            step_hard_timeout: Duration::from_secs(45),
            wait_timeout: Duration::from_secs(15),
            interactive_timeout: Duration::from_secs(8),
            max_retries: 2,
            stuck_step_threshold: Duration::from_secs(60),
            stuck_interactive_threshold: Duration::from_secs(50),
            stuck_iframe_threshold: Duration::from_secs(8),
            teaching_enabled: false,
            learning_window: Duration::from_secs(45),
            learning_poll_interval: Duration::from_millis(500),
            observer_poll_ceiling: Duration::from_secs(2),
            scroll_nudge_px: 600,
            event_noise_mode: EventNoiseMode::Default,
            learning_dir: PathBuf::from(".pagepilot/learning"),
            evidence_dir: PathBuf::from(".pagepilot/evidence"),
        }
    }
}

/// Values supplied on the command line or through `PAGEPILOT_*` variables.
///
/// Durations are in seconds. `None` leaves the file value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub run_timeout: Option<f64>,
    pub step_hard_timeout: Option<f64>,
    pub wait_timeout: Option<f64>,
    pub interactive_timeout: Option<f64>,
    pub max_retries: Option<u32>,
    pub teaching_enabled: Option<bool>,
    pub learning_window: Option<f64>,
    pub event_noise_mode: Option<EventNoiseMode>,
    pub learning_dir: Option<PathBuf>,
    pub evidence_dir: Option<PathBuf>,
}

/// Outcome of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Problems that make the configuration unusable.
    pub errors: Vec<(String, String)>,
    /// Suspicious but usable settings.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Returns true if there are no errors.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: &str, reason: impl Into<String>) {
        self.errors.push((field.to_string(), reason.into()));
    }
}

impl EngineConfig {
    /// Load configuration from a `.toml` or `.json` file.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(&content).map_err(|e| {
                PilotError::config_with_path(e.to_string(), path.to_path_buf())
            })
        } else {
            toml::from_str(&content).map_err(|e| {
                PilotError::config_with_path(e.to_string(), path.to_path_buf())
            })
        }
    }

    /// Find the config file for a project: `.pagepilot/config.toml` in the
    /// project, then `pagepilot/config.toml` in the user config directory.
    #[must_use]
    pub fn discover(project_dir: &Path) -> Option<PathBuf> {
        let local = project_dir.join(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("pagepilot").join("config.toml"))
            .filter(|path| path.exists())
    }

    /// Merge overrides into this snapshot. Called once, before the run.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        let set = |target: &mut Duration, value: Option<f64>| {
            if let Some(v) = value.filter(|v| v.is_finite() && *v >= 0.0) {
                *target = Duration::from_secs_f64(v);
            }
        };
        set(&mut self.run_timeout, overrides.run_timeout);
        set(&mut self.step_hard_timeout, overrides.step_hard_timeout);
        set(&mut self.wait_timeout, overrides.wait_timeout);
        set(&mut self.interactive_timeout, overrides.interactive_timeout);
        set(&mut self.learning_window, overrides.learning_window);
        if let Some(retries) = overrides.max_retries {
            self.max_retries = retries;
        }
        if let Some(teaching) = overrides.teaching_enabled {
            self.teaching_enabled = teaching;
        }
        if let Some(mode) = overrides.event_noise_mode {
            self.event_noise_mode = mode;
        }
        if let Some(ref dir) = overrides.learning_dir {
            self.learning_dir = dir.clone();
        }
        if let Some(ref dir) = overrides.evidence_dir {
            self.evidence_dir = dir.clone();
        }
        self
    }

    /// Check the configuration for values the engine cannot work with.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (field, value) in [
            ("step_hard_timeout", self.step_hard_timeout),
            ("wait_timeout", self.wait_timeout),
            ("interactive_timeout", self.interactive_timeout),
            ("stuck_step_threshold", self.stuck_step_threshold),
            ("stuck_interactive_threshold", self.stuck_interactive_threshold),
            ("stuck_iframe_threshold", self.stuck_iframe_threshold),
            ("observer_poll_ceiling", self.observer_poll_ceiling),
            ("learning_poll_interval", self.learning_poll_interval),
        ] {
            if value.is_zero() {
                report.error(field, "must be greater than zero");
            }
        }

        if self.teaching_enabled && self.learning_poll_interval >= self.learning_window {
            report.error(
                "learning_poll_interval",
                "must be shorter than learning_window",
            );
        }
        if self.interactive_timeout > self.step_hard_timeout {
            report.warnings.push(format!(
                "interactive_timeout ({:.1}s) exceeds step_hard_timeout ({:.1}s); \
                 actions will always be clamped by the step deadline",
                self.interactive_timeout.as_secs_f64(),
                self.step_hard_timeout.as_secs_f64()
            ));
        }
        if self.stuck_step_threshold < self.interactive_timeout {
            report.warnings.push(
                "stuck_step_threshold is shorter than one interactive attempt".to_string(),
            );
        }
        if self.stuck_interactive_threshold < self.step_hard_timeout {
            report.warnings.push(format!(
                "stuck_interactive_threshold ({:.1}s) is shorter than step_hard_timeout ({:.1}s); \
                 with a quiet observer a missing target ends as stuck, not as a timeout",
                self.stuck_interactive_threshold.as_secs_f64(),
                self.step_hard_timeout.as_secs_f64()
            ));
        }
        if self.run_timeout.is_zero() {
            report
                .warnings
                .push("run_timeout is zero; no step will be attempted".to_string());
        }

        report
    }

    /// Validate and turn the first error into a [`PilotError::InvalidConfig`].
    pub fn ensure_valid(&self) -> Result<()> {
        match self.validate().errors.into_iter().next() {
            Some((field, reason)) => Err(PilotError::invalid_config(field, reason)),
            None => Ok(()),
        }
    }

    /// Render as TOML, for `pagepilot config show`.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PilotError::config(e.to_string()))
    }
}
