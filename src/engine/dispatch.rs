//! Step dispatch: translating step kinds into driver calls, and the
//! per-step flows for interactive and wait steps.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::context::{bounded, RunContext};
use super::retry::{attempt_with_retries, RetryOutcome};
use crate::deadline::{Clamp, DeadlineScope, PROBE_CEILING};
use crate::driver::{BrowserDriver, DriverError, DriverResult, Query, SelectBy};
use crate::error::PilotError;
use crate::evidence::EvidenceStage;
use crate::handoff::HandoffTrigger;
use crate::report::{ActionRecord, StepOutcome, StepStatus};
use crate::step::{Step, StepKind};
use crate::watchdog::StuckReason;

/// Most clicks a `BulkClickUntilEmpty` step will issue.
pub const MAX_BULK_CLICKS: usize = 50;

/// Attempts to release a trapped frame focus before giving up.
const FOCUS_RELEASE_ATTEMPTS: u32 = 2;

/// Driver query that locates the target of `step`.
#[must_use]
pub fn query_for(step: &Step) -> Query {
    match step.kind {
        StepKind::ClickText | StepKind::MaybeClickText | StepKind::WaitText => {
            Query::Text(step.target.clone())
        }
        StepKind::BulkClickInCards => Query::TextWithin {
            scope: step.target.clone(),
            text: step.value.clone(),
        },
        StepKind::ClickSelector
        | StepKind::BulkClickUntilEmpty
        | StepKind::FillSelector
        | StepKind::SelectLabel
        | StepKind::SelectValue
        | StepKind::WaitSelector => Query::Selector(step.target.clone()),
    }
}

/// Perform `step` once. Returns how many elements were acted on.
pub async fn perform(driver: &dyn BrowserDriver, step: &Step, timeout: Duration) -> DriverResult<usize> {
    let locator = driver.locate(&query_for(step));
    match step.kind {
        StepKind::ClickSelector | StepKind::ClickText | StepKind::MaybeClickText => {
            locator.click(timeout).await?;
            Ok(1)
        }
        StepKind::FillSelector => {
            locator.fill(&step.value, timeout).await?;
            Ok(1)
        }
        StepKind::SelectLabel => {
            locator
                .select_option(&SelectBy::Label(step.value.clone()), timeout)
                .await?;
            Ok(1)
        }
        StepKind::SelectValue => {
            locator
                .select_option(&SelectBy::Value(step.value.clone()), timeout)
                .await?;
            Ok(1)
        }
        StepKind::WaitSelector | StepKind::WaitText => {
            locator.wait_visible(timeout).await?;
            Ok(0)
        }
        StepKind::BulkClickInCards | StepKind::BulkClickUntilEmpty => {
            perform_bulk(driver, step, || Ok(timeout)).await
        }
    }
}

/// Bulk clicks. Every count and click takes a fresh timeout from
/// `next_timeout` and is bounded on its own.
async fn perform_bulk<F>(
    driver: &dyn BrowserDriver,
    step: &Step,
    mut next_timeout: F,
) -> DriverResult<usize>
where
    F: FnMut() -> DriverResult<Duration>,
{
    let locator = driver.locate(&query_for(step));

    if step.kind == StepKind::BulkClickInCards {
        let timeout = next_timeout()?;
        let total = bounded(timeout, locator.count(timeout)).await?;
        for i in 0..total {
            let timeout = next_timeout()?;
            bounded(timeout, locator.nth(i).click(timeout)).await?;
        }
        return Ok(total);
    }

    let mut clicks = 0;
    while clicks < MAX_BULK_CLICKS {
        let timeout = next_timeout()?;
        if bounded(timeout, locator.count(timeout)).await? == 0 {
            break;
        }
        let timeout = next_timeout()?;
        bounded(timeout, locator.nth(0).click(timeout)).await?;
        clicks += 1;
    }
    if clicks == MAX_BULK_CLICKS {
        warn!("Stopped {} after {} clicks", step.describe(), MAX_BULK_CLICKS);
    }
    Ok(clicks)
}

/// Perform one candidate for the retry orchestrator. Bulk steps clamp each
/// driver call against the step and run deadlines instead of sharing one
/// timeout across the whole list.
pub async fn perform_within(
    ctx: &RunContext<'_>,
    step: &Step,
    timeout: Duration,
    step_deadline: Instant,
) -> DriverResult<usize> {
    let driver = ctx.deps.driver.as_ref();
    if !step.kind.is_bulk() {
        return bounded(timeout, perform(driver, step, timeout)).await;
    }
    let budget = ctx.budget;
    perform_bulk(driver, step, || {
        match budget.clamp(step.kind, step_deadline, Instant::now()) {
            Clamp::Ready(timeout) => Ok(timeout),
            Clamp::Exhausted(scope) => Err(DriverError::timeout(
                format!("{scope} deadline reached during {}", step.describe()),
                Duration::ZERO,
            )),
        }
    })
    .await
}

/// Number of elements the step would act on. Probe failures count as zero.
pub async fn probe(driver: &dyn BrowserDriver, step: &Step, timeout: Duration) -> usize {
    let locator = driver.locate(&query_for(step));
    match bounded(timeout, locator.count(timeout)).await {
        Ok(count) => count,
        Err(e) => {
            debug!("Applicability probe for {} failed: {}", step.describe(), e);
            0
        }
    }
}

fn deadline_trigger(scope: DeadlineScope) -> HandoffTrigger {
    match scope {
        DeadlineScope::Run => HandoffTrigger::RunTimeout,
        DeadlineScope::Step => HandoffTrigger::InteractiveTimeout,
    }
}

pub(super) async fn timeout_handoff(
    ctx: &mut RunContext<'_>,
    index: usize,
    step: &Step,
    scope: DeadlineScope,
    attempted: Vec<String>,
) -> StepOutcome {
    ctx.capture_evidence(index, step.kind, EvidenceStage::Timeout).await;
    let decision = ctx.hand_off(index, step, deadline_trigger(scope), attempted).await;
    StepOutcome::new(index, step, StepStatus::Timeout).with_reason(decision.reason())
}

/// Make sure input focus is on the top-level page. Returns false when it
/// stays trapped in a nested frame.
async fn ensure_top_level_focus(ctx: &RunContext<'_>, step_deadline: Instant) -> bool {
    if !ctx.frame_focus_locked(step_deadline).await {
        return true;
    }
    for attempt in 1..=FOCUS_RELEASE_ATTEMPTS {
        let Clamp::Ready(timeout) =
            ctx.budget
                .clamp_with(PROBE_CEILING, step_deadline, Instant::now())
        else {
            return false;
        };
        let released = bounded(timeout, ctx.deps.driver.release_frame_focus(timeout))
            .await
            .unwrap_or(false);
        debug!("Frame focus release attempt {}: {}", attempt, released);
        if !ctx.frame_focus_locked(step_deadline).await {
            return true;
        }
    }
    false
}

/// Run an interactive step through the retry orchestrator.
pub async fn dispatch_interactive(
    ctx: &mut RunContext<'_>,
    index: usize,
    step: &Step,
    step_deadline: Instant,
) -> StepOutcome {
    if !ensure_top_level_focus(ctx, step_deadline).await {
        ctx.capture_evidence(index, step.kind, EvidenceStage::Stuck).await;
        let decision = ctx
            .hand_off(index, step, HandoffTrigger::StuckIframeFocus, Vec::new())
            .await;
        return StepOutcome::new(index, step, StepStatus::Stuck).with_reason(decision.reason());
    }

    if step.kind.needs_applicability_probe() {
        match ctx
            .budget
            .clamp_with(PROBE_CEILING, step_deadline, Instant::now())
        {
            Clamp::Exhausted(scope) => {
                return timeout_handoff(ctx, index, step, scope, Vec::new()).await;
            }
            Clamp::Ready(timeout) => {
                if probe(ctx.deps.driver.as_ref(), step, timeout).await == 0 {
                    info!("Skipping {}: no matching element", step.describe());
                    return StepOutcome::new(index, step, StepStatus::SkippedNotApplicable)
                        .with_reason("no matching element");
                }
            }
        }
    }

    let started = Instant::now();
    match attempt_with_retries(ctx, index, step, step_deadline).await {
        Ok(outcome) => settle(ctx, index, step, started, step_deadline, outcome).await,
        Err(PilotError::RuntimeClosed { detail }) => ctx.crash(index, step, &detail),
        Err(e) if step.kind.is_optional() => {
            info!("Optional {} skipped: {}", step.describe(), e);
            StepOutcome::new(index, step, StepStatus::SkippedNotApplicable)
                .with_reason(e.to_string())
        }
        Err(e) if e.is_timeout() => {
            timeout_handoff(ctx, index, step, DeadlineScope::Step, vec![e.to_string()]).await
        }
        Err(e) => {
            let trigger = HandoffTrigger::TargetNotFound {
                error: e.to_string(),
            };
            let decision = ctx.hand_off(index, step, trigger, vec![e.to_string()]).await;
            StepOutcome::new(index, step, StepStatus::Failed).with_reason(decision.reason())
        }
    }
}

async fn settle(
    ctx: &mut RunContext<'_>,
    index: usize,
    step: &Step,
    started: Instant,
    step_deadline: Instant,
    outcome: RetryOutcome,
) -> StepOutcome {
    if let Some(scope) = outcome.deadline_hit {
        return timeout_handoff(ctx, index, step, scope, outcome.attempted).await;
    }

    if let Some(reason) = outcome.stuck {
        if step.kind.is_optional() {
            return StepOutcome::new(index, step, StepStatus::SkippedNotApplicable)
                .with_reason(reason.as_str());
        }
        ctx.capture_evidence(index, step.kind, EvidenceStage::Stuck).await;
        let trigger = match reason {
            StuckReason::StuckIframeFocus => HandoffTrigger::StuckIframeFocus,
            StuckReason::Stuck => HandoffTrigger::Stuck,
        };
        let decision = ctx.hand_off(index, step, trigger, outcome.attempted).await;
        return StepOutcome::new(index, step, StepStatus::Stuck).with_reason(decision.reason());
    }

    let elapsed = Instant::now().saturating_duration_since(started);
    ctx.report.actions.push(ActionRecord {
        index,
        kind: step.kind,
        target: step.target.clone(),
        selector_used: outcome.selector_used.clone(),
        attempts: outcome.attempts,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    });
    let action_count = ctx.report.actions.len();
    ctx.watchdog.note_actions(action_count, Instant::now());

    if let Some(selector) = outcome.selector_used {
        match ctx.current_state_key(step_deadline).await {
            Some(key) => match ctx.deps.store.remember(&key, step.learning_target(), &selector) {
                Ok(true) => info!("Learned selector {} for {}", selector, step.learning_target()),
                Ok(false) => {}
                Err(e) => warn!("Failed to persist learned selector: {}", e),
            },
            None => debug!("Not persisting {}: no budget to key the page", selector),
        }
        ctx.report
            .observations
            .push(format!("learned_selector={selector}"));
    }

    StepOutcome::new(index, step, StepStatus::Executed)
}

/// Run a wait step directly, without candidate fallback.
pub async fn dispatch_wait(
    ctx: &mut RunContext<'_>,
    index: usize,
    step: &Step,
    step_deadline: Instant,
) -> StepOutcome {
    let timeout = match ctx.budget.clamp(step.kind, step_deadline, Instant::now()) {
        Clamp::Ready(timeout) => timeout,
        Clamp::Exhausted(scope) => {
            return timeout_handoff(ctx, index, step, scope, Vec::new()).await;
        }
    };

    let attempted = vec![query_for(step).describe()];
    match bounded(timeout, perform(ctx.deps.driver.as_ref(), step, timeout)).await {
        Ok(_) => StepOutcome::new(index, step, StepStatus::Executed),
        Err(DriverError::Closed { detail }) => ctx.crash(index, step, &detail),
        Err(e @ DriverError::Timeout { .. }) => {
            debug!("Wait {} timed out: {}", step.describe(), e);
            let scope = if ctx.budget.run_expired(Instant::now()) {
                DeadlineScope::Run
            } else {
                DeadlineScope::Step
            };
            timeout_handoff(ctx, index, step, scope, attempted).await
        }
        Err(e) => {
            let trigger = HandoffTrigger::TargetNotFound {
                error: PilotError::from(e).to_string(),
            };
            let decision = ctx.hand_off(index, step, trigger, attempted).await;
            StepOutcome::new(index, step, StepStatus::Failed).with_reason(decision.reason())
        }
    }
}
