//! Retry orchestrator.
//!
//! ```text
//! round 0..=max_retries
//!   ├── deadline check (step, run)        -> deadline_hit
//!   ├── scroll nudge + evidence (round > 0)
//!   └── for candidate in resolver order
//!         ├── clamp timeout               -> deadline_hit
//!         ├── perform                     -> success (selector_used)
//!         └── poll observer, watchdog     -> stuck
//! exhausted                               -> last error
//! ```
//!
//! Learned selectors are re-read at the start of every round, so a selector
//! taught mid-run is picked up without restarting the step.

use tokio::time::Instant;
use tracing::debug;

use super::context::{bounded, RunContext};
use super::dispatch::perform_within;
use crate::deadline::{remaining, Clamp, DeadlineScope};
use crate::driver::DriverError;
use crate::error::{PilotError, Result};
use crate::evidence::EvidenceStage;
use crate::resolver::build_candidates;
use crate::step::Step;
use crate::watchdog::StuckReason;

/// What happened across all rounds of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Selector of the non-original candidate that succeeded.
    pub selector_used: Option<String>,
    /// Set when the watchdog stopped the retries.
    pub stuck: Option<StuckReason>,
    /// Candidate trail, in attempt order.
    pub attempted: Vec<String>,
    /// Set when a deadline ran out before an attempt could start.
    pub deadline_hit: Option<DeadlineScope>,
    /// Number of candidate attempts made.
    pub attempts: u32,
}

impl RetryOutcome {
    fn deadline(mut self, scope: DeadlineScope) -> Self {
        self.deadline_hit = Some(scope);
        self
    }
}

fn check_deadlines(ctx: &RunContext<'_>, step_deadline: Instant) -> Option<DeadlineScope> {
    let now = Instant::now();
    if ctx.budget.run_expired(now) {
        Some(DeadlineScope::Run)
    } else if remaining(step_deadline, now).is_zero() {
        Some(DeadlineScope::Step)
    } else {
        None
    }
}

async fn scroll_nudge(ctx: &RunContext<'_>, step: &Step, step_deadline: Instant) {
    let Clamp::Ready(timeout) = ctx.budget.clamp(step.kind, step_deadline, Instant::now()) else {
        return;
    };
    let dy = ctx.config.scroll_nudge_px;
    if let Err(e) = bounded(timeout, ctx.deps.driver.scroll_by(0, dy, timeout)).await {
        debug!("Scroll nudge failed: {}", e);
    }
}

async fn stuck_verdict(ctx: &mut RunContext<'_>, step_deadline: Instant) -> Option<StuckReason> {
    ctx.poll_observer().await;
    let now = Instant::now();
    let locked = ctx.watchdog.frame_check_due(now) && ctx.frame_focus_locked(step_deadline).await;
    ctx.watchdog.should_mark_stuck(now, locked)
}

/// Attempt `step` until a candidate succeeds, the watchdog declares the run
/// stuck, or a deadline is hit. When every candidate of every round fails,
/// the last error is returned for the caller to classify.
pub async fn attempt_with_retries(
    ctx: &mut RunContext<'_>,
    index: usize,
    step: &Step,
    step_deadline: Instant,
) -> Result<RetryOutcome> {
    let mut outcome = RetryOutcome::default();
    let mut last_error: Option<PilotError> = None;

    for round in 0..=ctx.config.max_retries {
        if let Some(scope) = check_deadlines(ctx, step_deadline) {
            return Ok(outcome.deadline(scope));
        }
        if round == 0 {
            ctx.capture_evidence(index, step.kind, EvidenceStage::Before).await;
        } else {
            scroll_nudge(ctx, step, step_deadline).await;
            ctx.capture_evidence(index, step.kind, EvidenceStage::Retry(round))
                .await;
        }

        let learned = ctx.learned_selectors(step, step_deadline).await;
        let candidates = build_candidates(step, &learned);
        debug!(
            "Round {} of {}: {} candidates",
            round,
            step.describe(),
            candidates.len()
        );

        for candidate in candidates {
            let timeout = match ctx.budget.clamp(step.kind, step_deadline, Instant::now()) {
                Clamp::Ready(timeout) => timeout,
                Clamp::Exhausted(scope) => return Ok(outcome.deadline(scope)),
            };

            outcome.attempts += 1;
            outcome.attempted.push(candidate.describe());
            debug!("Attempt {}: {} ({:?})", outcome.attempts, candidate.describe(), timeout);

            match perform_within(ctx, &candidate.step, timeout, step_deadline).await {
                Ok(_) => {
                    if !candidate.is_original() {
                        outcome.selector_used = Some(candidate.learnable_selector());
                    }
                    ctx.capture_evidence(index, step.kind, EvidenceStage::After).await;
                    return Ok(outcome);
                }
                Err(DriverError::Closed { detail }) => {
                    return Err(PilotError::closed(detail));
                }
                Err(e) => {
                    debug!("Candidate {} failed: {}", candidate.describe(), e);
                    last_error = Some(e.into());
                    if let Some(reason) = stuck_verdict(ctx, step_deadline).await {
                        outcome.stuck = Some(reason);
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| PilotError::not_found(step.target.clone())))
}
