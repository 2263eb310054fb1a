//! Deadline arithmetic.
//!
//! Every timeout handed to the browser driver or the observer channel is
//! computed here. The effective timeout of an action is the tightest of its
//! kind-specific timeout, the time left on the step, and the time left on
//! the run, and it never goes negative.
//!
//! Instants come from [`tokio::time::Instant`] so a paused test runtime
//! drives the whole engine on virtual time.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::step::StepKind;

/// Extra time allowed for evidence capture after a deadline has passed, so a
/// `*_timeout.png` can still be taken.
pub const EVIDENCE_GRACE: Duration = Duration::from_secs(2);

/// Ceiling for a single screenshot.
pub const EVIDENCE_CEILING: Duration = Duration::from_secs(5);

/// Ceiling for the applicability probe of optional and bulk steps.
pub const PROBE_CEILING: Duration = Duration::from_millis(1500);

/// Slack added to the outer `tokio::time::timeout` around every driver call,
/// on top of the timeout the driver itself was given.
pub const CALL_SLACK: Duration = Duration::from_millis(250);

/// Time left until `deadline`, clamped at zero.
#[must_use]
pub fn remaining(deadline: Instant, now: Instant) -> Duration {
    deadline.saturating_duration_since(now)
}

/// `min(kind_timeout, remaining(step_deadline), remaining(run_deadline))`.
#[must_use]
pub fn effective_timeout(
    kind_timeout: Duration,
    step_deadline: Instant,
    run_deadline: Instant,
    now: Instant,
) -> Duration {
    kind_timeout
        .min(remaining(step_deadline, now))
        .min(remaining(run_deadline, now))
}

/// Which ceiling ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineScope {
    /// The per-step hard timeout.
    Step,
    /// The run-level deadline.
    Run,
}

impl DeadlineScope {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::Run => "run",
        }
    }
}

impl std::fmt::Display for DeadlineScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of clamping an action's timeout before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clamp {
    /// The action may run with this timeout.
    Ready(Duration),
    /// No budget left; the action must not be attempted.
    Exhausted(DeadlineScope),
}

impl Clamp {
    /// The usable timeout, if any.
    #[must_use]
    pub fn ready(self) -> Option<Duration> {
        match self {
            Self::Ready(timeout) => Some(timeout),
            Self::Exhausted(_) => None,
        }
    }
}

/// Deadlines for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    pub run_deadline: Instant,
    pub step_hard_timeout: Duration,
    pub wait_timeout: Duration,
    pub interactive_timeout: Duration,
}

impl RunBudget {
    /// Budget for a run that starts at `started`.
    #[must_use]
    pub fn new(config: &EngineConfig, started: Instant) -> Self {
        Self {
            run_deadline: started + config.run_timeout,
            step_hard_timeout: config.step_hard_timeout,
            wait_timeout: config.wait_timeout,
            interactive_timeout: config.interactive_timeout,
        }
    }

    /// Deadline of a step starting at `step_started`, never past the run
    /// deadline.
    #[must_use]
    pub fn step_deadline(&self, step_started: Instant) -> Instant {
        (step_started + self.step_hard_timeout).min(self.run_deadline)
    }

    /// Kind-specific timeout before clamping.
    #[must_use]
    pub fn kind_timeout(&self, kind: StepKind) -> Duration {
        if kind.is_wait() {
            self.wait_timeout
        } else {
            self.interactive_timeout
        }
    }

    /// True once the run deadline has been reached.
    #[must_use]
    pub fn run_expired(&self, now: Instant) -> bool {
        remaining(self.run_deadline, now).is_zero()
    }

    /// Time left on the run.
    #[must_use]
    pub fn run_remaining(&self, now: Instant) -> Duration {
        remaining(self.run_deadline, now)
    }

    /// Clamp an action of `kind` against the step and run deadlines.
    ///
    /// When both deadlines are exhausted the run deadline is reported, since
    /// it also stops every later step.
    #[must_use]
    pub fn clamp(&self, kind: StepKind, step_deadline: Instant, now: Instant) -> Clamp {
        self.clamp_with(self.kind_timeout(kind), step_deadline, now)
    }

    /// Clamp an arbitrary ceiling against the step and run deadlines.
    #[must_use]
    pub fn clamp_with(&self, ceiling: Duration, step_deadline: Instant, now: Instant) -> Clamp {
        if self.run_expired(now) {
            return Clamp::Exhausted(DeadlineScope::Run);
        }
        if remaining(step_deadline, now).is_zero() {
            return Clamp::Exhausted(DeadlineScope::Step);
        }
        let timeout = effective_timeout(ceiling, step_deadline, self.run_deadline, now);
        if timeout.is_zero() {
            Clamp::Exhausted(DeadlineScope::Step)
        } else {
            Clamp::Ready(timeout)
        }
    }

    /// `ceiling`, cut to the time left on the run plus [`EVIDENCE_GRACE`].
    /// For the bookkeeping calls that still run once a deadline has fired.
    #[must_use]
    pub fn grace_timeout(&self, ceiling: Duration, now: Instant) -> Duration {
        ceiling.min(remaining(self.run_deadline, now) + EVIDENCE_GRACE)
    }

    /// Timeout for evidence capture: bounded by the run deadline plus
    /// [`EVIDENCE_GRACE`].
    #[must_use]
    pub fn evidence_timeout(&self, now: Instant) -> Duration {
        self.grace_timeout(EVIDENCE_CEILING, now)
    }
}
