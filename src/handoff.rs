//! Human handoff state machine.
//!
//! Stuck verdicts, exhausted budgets, and unresolvable targets all end up
//! here. [`decide`] is a pure function from a trigger and its context to a
//! [`HandoffDecision`]; the execution loop merges the decision into the
//! single-owner [`RunState`] with [`RunState::apply`].
//!
//! ```text
//! Running -> {StuckIframeFocus, Stuck, InteractiveTimeout, RunTimeout, TargetNotFound}
//!         -> ReleasedForHuman | Failed
//! ```
//!
//! # Example
//!
//! ```
//! use pagepilot::handoff::{decide, HandoffContext, HandoffTrigger, RunState};
//! use pagepilot::report::RunVerdict;
//! use pagepilot::step::StepKind;
//!
//! let ctx = HandoffContext::new(0, StepKind::ClickText, "0:click_text:Stop", "Stop");
//! let decision = decide(&HandoffTrigger::Stuck, &ctx);
//! assert_eq!(decision.verdict, RunVerdict::Failed);
//!
//! let mut state = RunState::new();
//! state.apply(&decision);
//! assert!(state.forced_failure);
//! ```

use serde::{Deserialize, Serialize};

use crate::report::{Finding, RunVerdict};
use crate::step::StepKind;

/// What made the engine give up on automated progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffTrigger {
    /// Focus could not be returned to the top-level page.
    StuckIframeFocus,
    /// The watchdog declared the run stuck.
    Stuck,
    /// A step's budget ran out before or while acting.
    InteractiveTimeout,
    /// The run deadline is gone.
    RunTimeout,
    /// Every candidate failed with a non-timeout error.
    TargetNotFound { error: String },
}

impl HandoffTrigger {
    /// Reason string recorded in the run state and report.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::StuckIframeFocus => "stuck_iframe_focus",
            Self::Stuck => "stuck",
            Self::InteractiveTimeout => "interactive_timeout",
            Self::RunTimeout => "run_timeout",
            Self::TargetNotFound { .. } => "target_not_found",
        }
    }
}

/// Where a run goes after a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Automation stops driving the page so a human can act.
    ReleasedForHuman,
    /// Hard failure with no recovery path.
    Failed,
}

/// Everything [`decide`] needs to know about the step that triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffContext {
    pub index: usize,
    pub kind: StepKind,
    pub teaching_enabled: bool,
    /// Current step signature.
    pub where_: String,
    /// Candidate/retry trail.
    pub attempted: Vec<String>,
    /// Label the human should be taught for.
    pub failed_target: String,
}

impl HandoffContext {
    pub fn new(
        index: usize,
        kind: StepKind,
        where_: impl Into<String>,
        failed_target: impl Into<String>,
    ) -> Self {
        Self {
            index,
            kind,
            teaching_enabled: false,
            where_: where_.into(),
            attempted: Vec::new(),
            failed_target: failed_target.into(),
        }
    }

    #[must_use]
    pub fn with_teaching(mut self, enabled: bool) -> Self {
        self.teaching_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_attempted(mut self, attempted: Vec<String>) -> Self {
        self.attempted = attempted;
        self
    }
}

/// Outcome of one handoff transition, to be merged into [`RunState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffDecision {
    pub trigger: HandoffTrigger,
    pub disposition: Disposition,
    pub verdict: RunVerdict,
    pub finding: Finding,
    pub release_control: bool,
    pub open_learning_window: bool,
    pub console_error: Option<String>,
    pub where_: String,
    pub attempted: Vec<String>,
    pub failed_target: String,
}

impl HandoffDecision {
    #[must_use]
    pub fn reason(&self) -> &'static str {
        self.trigger.reason()
    }
}

fn timeout_console_error(ctx: &HandoffContext) -> String {
    let class = if ctx.kind.is_wait() { "wait" } else { "interactive" };
    format!(
        "Timeout on {} step {} ({} {})",
        class,
        ctx.index + 1,
        ctx.kind,
        ctx.failed_target
    )
}

fn teaching_next_action(ctx: &HandoffContext, fallback: &str) -> String {
    if ctx.teaching_enabled {
        format!(
            "perform the intended action on '{}' manually; it will be learned for next time",
            ctx.failed_target
        )
    } else {
        fallback.to_string()
    }
}

/// Decide how a run reacts to `trigger`.
#[must_use]
pub fn decide(trigger: &HandoffTrigger, ctx: &HandoffContext) -> HandoffDecision {
    let teaching = ctx.teaching_enabled;
    let mut console_error = None;

    let (released, verdict, finding) = match trigger {
        HandoffTrigger::StuckIframeFocus => (
            true,
            RunVerdict::Partial,
            Finding::new(
                "stuck_iframe_focus",
                &ctx.where_,
                "input focus is trapped inside a nested frame and could not be returned to the page",
                ctx.attempted.clone(),
                "click on the top-level page to return focus, then resume",
            ),
        ),
        HandoffTrigger::Stuck => (
            teaching,
            if teaching { RunVerdict::Partial } else { RunVerdict::Failed },
            Finding::new(
                "stuck",
                &ctx.where_,
                "no step change or observable page progress within the watchdog thresholds",
                ctx.attempted.clone(),
                teaching_next_action(ctx, "enable teaching mode or update the target for this step"),
            ),
        ),
        HandoffTrigger::InteractiveTimeout => {
            console_error = Some(timeout_console_error(ctx));
            let what = if ctx.kind.is_wait() {
                "wait_timeout"
            } else {
                "interactive_timeout"
            };
            (
                teaching,
                if teaching { RunVerdict::Partial } else { RunVerdict::Failed },
                Finding::new(
                    what,
                    &ctx.where_,
                    "target did not become available within the effective timeout",
                    ctx.attempted.clone(),
                    teaching_next_action(ctx, "check that the target exists and is visible, or raise the step timeout"),
                ),
            )
        }
        HandoffTrigger::RunTimeout => (
            true,
            if teaching { RunVerdict::Partial } else { RunVerdict::Failed },
            Finding::new(
                "run_timeout",
                &ctx.where_,
                "run deadline reached before the step could complete; control released",
                ctx.attempted.clone(),
                "control released to the operator; rerun with a larger run timeout",
            ),
        ),
        HandoffTrigger::TargetNotFound { error } => (
            teaching,
            if teaching { RunVerdict::Partial } else { RunVerdict::Failed },
            Finding::new(
                "target_not_found",
                &ctx.where_,
                error.as_str(),
                ctx.attempted.clone(),
                teaching_next_action(ctx, "update the target or teach the correct control"),
            ),
        ),
    };

    let disposition = if verdict == RunVerdict::Failed {
        Disposition::Failed
    } else {
        Disposition::ReleasedForHuman
    };

    HandoffDecision {
        trigger: trigger.clone(),
        disposition,
        verdict,
        finding,
        release_control: released,
        open_learning_window: released && teaching,
        console_error,
        where_: ctx.where_.clone(),
        attempted: ctx.attempted.clone(),
        failed_target: ctx.failed_target.clone(),
    }
}

/// Mutable state of one run. Only the execution loop and the handoff
/// transitions touch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub control_enabled: bool,
    /// Keep the page open after the run so the operator can keep working.
    pub force_keep_open: bool,
    pub release_for_handoff: bool,
    pub wait_for_human_learning: bool,
    pub handoff_reason: Option<String>,
    pub handoff_where: Option<String>,
    pub handoff_attempted: Vec<String>,
    pub failed_target_for_teaching: Option<String>,
    pub result: RunVerdict,
    /// A hard error forces the final verdict to `failed`.
    pub forced_failure: bool,
    /// Set by any handoff, including ones that later resumed.
    pub handoff_occurred: bool,
    /// A human taught a selector during this run.
    pub human_takeover: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            control_enabled: true,
            force_keep_open: false,
            release_for_handoff: false,
            wait_for_human_learning: false,
            handoff_reason: None,
            handoff_where: None,
            handoff_attempted: Vec::new(),
            failed_target_for_teaching: None,
            result: RunVerdict::Success,
            forced_failure: false,
            handoff_occurred: false,
            human_takeover: false,
        }
    }

    /// Merge a handoff decision.
    pub fn apply(&mut self, decision: &HandoffDecision) {
        self.handoff_occurred = true;
        self.handoff_reason = Some(decision.reason().to_string());
        self.handoff_where = Some(decision.where_.clone());
        self.handoff_attempted = decision.attempted.clone();
        self.failed_target_for_teaching = Some(decision.failed_target.clone());
        self.result = decision.verdict;

        if decision.release_control {
            self.control_enabled = false;
            self.release_for_handoff = true;
            self.force_keep_open = true;
        }
        self.wait_for_human_learning = decision.open_learning_window;
        if decision.disposition == Disposition::Failed {
            self.forced_failure = true;
        }
    }

    /// The browser runtime disappeared.
    pub fn mark_crashed(&mut self) {
        self.forced_failure = true;
        self.result = RunVerdict::Failed;
    }

    /// A taught selector was replayed successfully; automation resumes.
    pub fn resume_after_teaching(&mut self) {
        self.control_enabled = true;
        self.release_for_handoff = false;
        self.wait_for_human_learning = false;
        self.force_keep_open = false;
    }

    /// Whether the step loop must stop.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.forced_failure || !self.control_enabled
    }

    /// Final verdict: forced failure beats everything, then any handoff or
    /// real finding makes the run partial.
    #[must_use]
    pub fn final_verdict(&self, has_findings: bool) -> RunVerdict {
        if self.forced_failure {
            RunVerdict::Failed
        } else if self.handoff_occurred || has_findings {
            RunVerdict::Partial
        } else {
            RunVerdict::Success
        }
    }
}
