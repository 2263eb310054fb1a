//! Stuck detection.
//!
//! The watchdog answers one question: is the run still getting anywhere?
//! It watches two clocks. The step clock resets when the step signature
//! changes. The progress clock resets when a new useful observer event is
//! seen, when an action visibly advanced, or along with the step clock.

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::config::EngineConfig;

/// Why the watchdog thinks the run is stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckReason {
    /// No progress and input focus is trapped in a nested frame.
    StuckIframeFocus,
    /// The step never advanced, or nothing observable happened.
    Stuck,
}

impl StuckReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StuckIframeFocus => "stuck_iframe_focus",
            Self::Stuck => "stuck",
        }
    }
}

impl std::fmt::Display for StuckReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staleness limits, taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogThresholds {
    /// Signature unchanged for longer than this is stuck.
    pub step: Duration,
    /// No progress for longer than this is stuck.
    pub interactive: Duration,
    /// No progress for longer than this, with focus trapped in a frame, is
    /// stuck in the frame.
    pub iframe: Duration,
}

impl WatchdogThresholds {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            step: config.stuck_step_threshold,
            interactive: config.stuck_interactive_threshold,
            iframe: config.stuck_iframe_threshold,
        }
    }
}

/// Watchdog clocks for one run.
#[derive(Debug, Clone)]
pub struct WatchdogState {
    pub current_step_signature: String,
    pub current_learning_target: String,
    pub last_step_change_ts: Instant,
    pub last_progress_event_ts: Instant,
    pub last_useful_event_count: u64,
    last_action_count: usize,
    thresholds: WatchdogThresholds,
}

impl WatchdogState {
    #[must_use]
    pub fn new(thresholds: WatchdogThresholds, now: Instant) -> Self {
        Self {
            current_step_signature: String::new(),
            current_learning_target: String::new(),
            last_step_change_ts: now,
            last_progress_event_ts: now,
            last_useful_event_count: 0,
            last_action_count: 0,
            thresholds,
        }
    }

    #[must_use]
    pub fn thresholds(&self) -> WatchdogThresholds {
        self.thresholds
    }

    // =========================================================================
    // Clock updates
    // =========================================================================

    /// Record the step being worked on. A changed signature resets both
    /// clocks. Returns whether it changed.
    pub fn update_step_signature(
        &mut self,
        signature: &str,
        learning_target: &str,
        now: Instant,
    ) -> bool {
        if self.current_step_signature == signature {
            return false;
        }
        self.current_step_signature = signature.to_string();
        self.current_learning_target = learning_target.to_string();
        self.last_step_change_ts = now;
        self.last_progress_event_ts = now;
        true
    }

    /// Feed the monotonic useful-event count. Returns whether it grew.
    pub fn poll_progress(&mut self, useful_event_count: u64, now: Instant) -> bool {
        if useful_event_count > self.last_useful_event_count {
            self.last_useful_event_count = useful_event_count;
            self.last_progress_event_ts = now;
            return true;
        }
        false
    }

    /// Feed the length of the action log; growth counts as progress.
    pub fn note_actions(&mut self, action_count: usize, now: Instant) -> bool {
        if action_count > self.last_action_count {
            self.last_action_count = action_count;
            self.last_progress_event_ts = now;
            return true;
        }
        false
    }

    // =========================================================================
    // Verdicts
    // =========================================================================

    /// Classify the run, checking the frame rule, then signature
    /// staleness, then progress staleness.
    #[must_use]
    pub fn evaluate_stuck_reason(&self, now: Instant, iframe_focus_locked: bool) -> Option<StuckReason> {
        let since_progress = now.saturating_duration_since(self.last_progress_event_ts);
        let since_step_change = now.saturating_duration_since(self.last_step_change_ts);

        if iframe_focus_locked && since_progress > self.thresholds.iframe {
            return Some(StuckReason::StuckIframeFocus);
        }
        if since_step_change > self.thresholds.step {
            return Some(StuckReason::Stuck);
        }
        if since_progress > self.thresholds.interactive {
            return Some(StuckReason::Stuck);
        }
        None
    }

    /// True once progress is old enough for the nested-frame rule to
    /// apply, so a focus probe is worth its cost.
    #[must_use]
    pub fn frame_check_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_progress_event_ts) > self.thresholds.iframe
    }

    /// Called after each failed candidate attempt, once any new observer
    /// events have been fed in. Logs the verdict.
    #[must_use]
    pub fn should_mark_stuck(&self, now: Instant, iframe_focus_locked: bool) -> Option<StuckReason> {
        let reason = self.evaluate_stuck_reason(now, iframe_focus_locked)?;
        warn!(
            "Watchdog verdict {} on {} (step age {:?}, progress age {:?})",
            reason,
            self.current_step_signature,
            now.saturating_duration_since(self.last_step_change_ts),
            now.saturating_duration_since(self.last_progress_event_ts),
        );
        Some(reason)
    }
}
