//! Learning-capture window.
//!
//! While control is released, poll the observer for a human click that
//! plausibly corrects the failed step, remember its selector, and replay the
//! intended action with it.

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::context::{bounded, RunContext};
use super::dispatch::perform;
use crate::deadline::{remaining, Clamp};
use crate::evidence::EvidenceStage;
use crate::learning::{target_key, TeachingRecord};
use crate::observer::ObservedEvent;
use crate::report::ActionRecord;
use crate::resolver::{learned_kind, looks_unstable, stable_click_variants};
use crate::step::{Step, StepKind};

/// Shortest key fragment allowed to match by containment.
const MIN_MATCH_LEN: usize = 3;

/// How the window ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A selector was learned; `replayed` tells whether the intended action
    /// then succeeded with it.
    Learned { selector: String, replayed: bool },
    /// The window elapsed without a qualifying event.
    NoEvent,
}

fn keys_match(failed: &str, observed: &str) -> bool {
    failed == observed
        || (failed.len() >= MIN_MATCH_LEN && observed.contains(failed))
        || (observed.len() >= MIN_MATCH_LEN && failed.contains(observed))
}

/// Whether `event` is a human correction for `failed_target`. With no
/// usable target, any non-control click qualifies.
#[must_use]
pub fn qualifies(event: &ObservedEvent, failed_target: Option<&str>) -> bool {
    if event.kind != "click" || event.is_control_ui() {
        return false;
    }
    let Some(failed) = failed_target.and_then(target_key) else {
        return true;
    };
    [&event.selector, &event.target, &event.text]
        .into_iter()
        .filter_map(|field| target_key(field))
        .any(|observed| keys_match(&failed, &observed))
}

/// Selector to learn from `event`, and whether it was derived from the
/// event text instead of taken as-is.
#[must_use]
pub fn selector_from_event(event: &ObservedEvent) -> Option<(String, bool)> {
    let selector = event.selector.trim();
    let text = event.text.trim();

    if !selector.is_empty() && !looks_unstable(selector) {
        return Some((selector.to_string(), false));
    }
    if !text.is_empty() {
        let derived = stable_click_variants(text)
            .into_iter()
            .next()
            .unwrap_or_else(|| format!("text={text}"));
        return Some((derived, true));
    }
    if selector.is_empty() {
        None
    } else {
        Some((selector.to_string(), false))
    }
}

/// Run the window for the step that handed off.
pub async fn run_learning_window(ctx: &mut RunContext<'_>, step: &Step) -> CaptureOutcome {
    let failed_target = ctx
        .state
        .failed_target_for_teaching
        .clone()
        .filter(|t| !t.trim().is_empty());
    let window_end = Instant::now() + ctx.config.learning_window;
    info!(
        "Learning window open for {:?} ({:?})",
        failed_target, ctx.config.learning_window
    );

    loop {
        for event in ctx.poll_new_events().await {
            if !qualifies(&event, failed_target.as_deref()) {
                continue;
            }
            let Some((selector, derived)) = selector_from_event(&event) else {
                continue;
            };
            return learn(ctx, step, failed_target.as_deref(), event, selector, derived).await;
        }

        let left = remaining(window_end, Instant::now());
        if left.is_zero() {
            break;
        }
        tokio::time::sleep(ctx.config.learning_poll_interval.min(left)).await;
    }

    info!("Learning window closed without a qualifying event");
    ctx.learning_capture = "none".to_string();
    ctx.report
        .observations
        .push("learning_capture=none".to_string());
    CaptureOutcome::NoEvent
}

async fn learn(
    ctx: &mut RunContext<'_>,
    step: &Step,
    failed_target: Option<&str>,
    event: ObservedEvent,
    selector: String,
    derived: bool,
) -> CaptureOutcome {
    let label = failed_target
        .map(str::to_string)
        .or_else(|| Some(event.text.clone()).filter(|t| !t.trim().is_empty()))
        .unwrap_or_else(|| event.selector.clone());
    let state_key = ctx.state_key_with_grace().await;

    info!("Human taught {} for {:?} on {}", selector, label, state_key);
    if let Err(e) = ctx.deps.store.remember(&state_key, &label, &selector) {
        warn!("Failed to persist taught selector: {}", e);
    }
    ctx.state.human_takeover = true;
    ctx.learning_capture = format!("captured:{selector}");
    ctx.report
        .observations
        .push(format!("learning_capture={selector}"));

    let replay = replay_taught(ctx, step, &selector).await;
    let replayed = replay.is_ok();

    let record = TeachingRecord {
        recorded_at: Utc::now(),
        state_key,
        target_key: target_key(&label).unwrap_or_default(),
        failed_target: label,
        selector: selector.clone(),
        derived,
        event,
        reason: ctx.state.handoff_reason.clone().unwrap_or_default(),
        where_: ctx.state.handoff_where.clone().unwrap_or_default(),
        replay: Some(match &replay {
            Ok(()) => "ok".to_string(),
            Err(reason) => reason.clone(),
        }),
    };
    match ctx.deps.audit.write(&record) {
        Ok(paths) => ctx.report.evidence_paths.extend(paths),
        Err(e) => warn!("Failed to write teaching audit record: {}", e),
    }

    match &replay {
        Ok(()) => {
            ctx.report.observations.push("learning_replay=ok".to_string());
            ctx.state.resume_after_teaching();
        }
        Err(reason) => ctx
            .report
            .observations
            .push(format!("learning_replay={reason}")),
    }

    CaptureOutcome::Learned { selector, replayed }
}

/// Replay the intended action with the taught selector.
async fn replay_taught(ctx: &mut RunContext<'_>, step: &Step, selector: &str) -> Result<(), String> {
    let Some(index) = ctx.handoff_index else {
        return Err("skipped_no_step".to_string());
    };
    let now = Instant::now();
    if ctx.budget.run_expired(now) {
        debug!("Skipping replay: run deadline passed");
        return Err("skipped_run_deadline".to_string());
    }

    let kind = learned_kind(step.kind).unwrap_or(StepKind::ClickSelector);
    let replay_step = step.retarget(kind, selector);
    let step_deadline = ctx.budget.step_deadline(now);
    let Clamp::Ready(timeout) = ctx.budget.clamp(kind, step_deadline, now) else {
        return Err("skipped_no_budget".to_string());
    };

    match bounded(timeout, perform(ctx.deps.driver.as_ref(), &replay_step, timeout)).await {
        Ok(_) => {
            let elapsed = Instant::now().saturating_duration_since(now);
            ctx.report.actions.push(ActionRecord {
                index,
                kind: step.kind,
                target: step.target.clone(),
                selector_used: Some(selector.to_string()),
                attempts: 1,
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            });
            ctx.capture_evidence(index, step.kind, EvidenceStage::Replay)
                .await;
            Ok(())
        }
        Err(e) => {
            warn!("Replay of taught selector {} failed: {}", selector, e);
            Err(format!("failed: {e}"))
        }
    }
}
