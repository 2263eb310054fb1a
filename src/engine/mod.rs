//! Execution loop.
//!
//! The engine walks the steps in order. Each step goes through the same
//! pre-checks, is dispatched as interactive (retry orchestrator) or wait
//! (direct), and leaves exactly one [`StepOutcome`]. A handoff stops the
//! loop; when it opened a learning window and the taught selector replays
//! successfully, the loop resumes with the next step.
//!
//! - [`context`] - `RunContext`, the per-run state threaded through everything
//! - [`dispatch`] - step kinds to driver calls, interactive and wait flows
//! - [`retry`] - the retry orchestrator
//! - [`capture`] - the learning-capture window
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use pagepilot::config::EngineConfig;
//! use pagepilot::engine::Engine;
//! use pagepilot::report::RunVerdict;
//! use pagepilot::step::{Step, StepKind};
//! use pagepilot::testing::{MemoryEvidenceSink, ScriptedDriver};
//!
//! # async fn demo() {
//! let driver = ScriptedDriver::new().with_visible("#go");
//! let engine = Engine::new(EngineConfig::default(), Arc::new(driver))
//!     .with_evidence(Arc::new(MemoryEvidenceSink::new()));
//!
//! let report = engine.run(&[Step::bare(StepKind::ClickSelector, "#go")]).await;
//! assert_eq!(report.result, RunVerdict::Success);
//! # }
//! ```

pub mod capture;
pub mod context;
pub mod dispatch;
pub mod retry;

pub use capture::CaptureOutcome;
pub use context::{Collaborators, RunContext};
pub use retry::RetryOutcome;

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::info;

use crate::config::EngineConfig;
use crate::deadline::{Clamp, DeadlineScope, RunBudget};
use crate::driver::BrowserDriver;
use crate::error::{PilotError, Result};
use crate::evidence::{EvidenceSink, EvidenceStage, FsEvidenceSink};
use crate::handoff::HandoffTrigger;
use crate::learning::{AuditLog, LearningStore};
use crate::observer::{NullObserver, ObserverChannel};
use crate::report::{
    backfill_findings, persist_best_effort, HandoffSummary, ReportSink, RunReport, StepOutcome,
    StepStatus,
};
use crate::step::{Step, StepPlan};

/// Drives one page through a list of steps.
pub struct Engine {
    config: EngineConfig,
    deps: Collaborators,
    report_sink: Option<Arc<dyn ReportSink>>,
}

impl Engine {
    /// Engine with no control agent, evidence written to the configured
    /// evidence directory, and learning under the configured learning
    /// directory.
    #[must_use]
    pub fn new(config: EngineConfig, driver: Arc<dyn BrowserDriver>) -> Self {
        let deps = Collaborators {
            driver,
            observer: Arc::new(NullObserver),
            evidence: Arc::new(FsEvidenceSink::new(&config.evidence_dir)),
            store: LearningStore::new(&config.learning_dir),
            audit: AuditLog::new(&config.learning_dir),
        };
        Self {
            config,
            deps,
            report_sink: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ObserverChannel>) -> Self {
        self.deps.observer = observer;
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Arc<dyn EvidenceSink>) -> Self {
        self.deps.evidence = evidence;
        self
    }

    #[must_use]
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.report_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &LearningStore {
        &self.deps.store
    }

    /// Validate the plan, open its page if it names one, and run it.
    pub async fn run_plan(&self, plan: &StepPlan) -> Result<RunReport> {
        plan.validate()?;
        if let Some(url) = &plan.url {
            let started = Instant::now();
            let budget = RunBudget::new(&self.config, started);
            let Clamp::Ready(timeout) = budget.clamp_with(
                self.config.step_hard_timeout,
                budget.step_deadline(started),
                started,
            ) else {
                return Err(PilotError::DeadlineExceeded {
                    scope: DeadlineScope::Run.to_string(),
                });
            };
            info!("Opening {}", url);
            context::bounded(timeout, self.deps.driver.navigate(url, timeout)).await?;
        }
        Ok(self.run(&plan.steps).await)
    }

    /// Run `steps` in order and return the final report.
    pub async fn run(&self, steps: &[Step]) -> RunReport {
        let started = Instant::now();
        let mut ctx = RunContext::new(&self.config, &self.deps, RunReport::begin(), started);
        info!(
            "Run {} started: {} steps, teaching {}",
            ctx.report.run_id,
            steps.len(),
            if self.config.teaching_enabled { "on" } else { "off" }
        );

        let mut next = 0;
        while next < steps.len() {
            let Some(stopped) = run_steps(&mut ctx, steps, next).await else {
                break;
            };
            if !ctx.state.wait_for_human_learning {
                break;
            }
            match capture::run_learning_window(&mut ctx, &steps[stopped]).await {
                CaptureOutcome::Learned { replayed: true, .. } => {
                    info!("Resuming after taught step {}", stopped + 1);
                    next = stopped + 1;
                }
                CaptureOutcome::Learned { .. } | CaptureOutcome::NoEvent => break,
            }
        }

        let report = finalize(ctx).await;
        if let Some(sink) = &self.report_sink {
            persist_best_effort(sink.as_ref(), &report);
        }
        report
    }
}

/// Run steps from `from` until done or a stop is requested. Returns the
/// index of the step that stopped the loop.
async fn run_steps(ctx: &mut RunContext<'_>, steps: &[Step], from: usize) -> Option<usize> {
    for (index, step) in steps.iter().enumerate().skip(from) {
        // Judged on the clocks of the step before, so it has to run ahead
        // of the signature update. The first step after a resume is exempt:
        // its clocks still carry the learning window.
        let outcome = match teaching_stuck_check(ctx, index, step, index > from).await {
            Some(stuck) => stuck,
            None => {
                ctx.watchdog.update_step_signature(
                    &step.signature(index),
                    step.learning_target(),
                    Instant::now(),
                );
                info!("Step {}/{}: {}", index + 1, steps.len(), step.describe());
                execute_step(ctx, index, step).await
            }
        };
        info!("Step {} {:?}", index + 1, outcome.status);
        ctx.report.steps.push(outcome);

        if ctx.state.should_stop() {
            return Some(index);
        }
    }
    None
}

/// Between steps of a teaching run, hand off when the run already went
/// stale before `step` could start.
async fn teaching_stuck_check(
    ctx: &mut RunContext<'_>,
    index: usize,
    step: &Step,
    has_previous: bool,
) -> Option<StepOutcome> {
    if !ctx.config.teaching_enabled || !has_previous || ctx.deps.driver.is_closed() {
        return None;
    }
    ctx.poll_observer().await;
    let reason = ctx.watchdog.should_mark_stuck(Instant::now(), false)?;
    info!("Step {} not started: run is {}", index + 1, reason);
    ctx.capture_evidence(index, step.kind, EvidenceStage::Stuck).await;
    let decision = ctx
        .hand_off(index, step, HandoffTrigger::Stuck, Vec::new())
        .await;
    Some(StepOutcome::new(index, step, StepStatus::Stuck).with_reason(decision.reason()))
}

async fn execute_step(ctx: &mut RunContext<'_>, index: usize, step: &Step) -> StepOutcome {
    if ctx.deps.driver.is_closed() {
        return ctx.crash(index, step, "page closed before the step started");
    }

    let now = Instant::now();
    if ctx.budget.run_expired(now) {
        return dispatch::timeout_handoff(ctx, index, step, DeadlineScope::Run, Vec::new()).await;
    }
    let step_deadline = ctx.budget.step_deadline(now);

    if step.kind.is_wait() {
        dispatch::dispatch_wait(ctx, index, step, step_deadline).await
    } else {
        dispatch::dispatch_interactive(ctx, index, step, step_deadline).await
    }
}

async fn finalize(mut ctx: RunContext<'_>) -> RunReport {
    ctx.poll_observer().await;

    let has_findings =
        !ctx.report.console_errors.is_empty() || !ctx.report.network_findings.is_empty();
    ctx.report.result = ctx.state.final_verdict(has_findings);
    backfill_findings(&mut ctx.report.ui_findings);
    backfill_findings(&mut ctx.report.network_findings);

    if let Some(reason) = ctx.state.handoff_reason.clone() {
        ctx.report.handoff = Some(HandoffSummary {
            reason,
            where_: ctx.state.handoff_where.clone().unwrap_or_default(),
            human_takeover: ctx.state.human_takeover,
            learning_capture: ctx.learning_capture.clone(),
        });
    }
    ctx.report.finished_at = Utc::now();

    info!(
        "Run {} finished: {} ({} steps, {} actions)",
        ctx.report.run_id,
        ctx.report.result,
        ctx.report.steps.len(),
        ctx.report.actions.len()
    );
    ctx.report
}
