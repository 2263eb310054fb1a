//! Per-run state threaded through the execution loop, the retry
//! orchestrator, and the learning-capture window.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::deadline::{Clamp, RunBudget, CALL_SLACK, PROBE_CEILING};
use crate::driver::{BrowserDriver, DriverError, DriverResult};
use crate::evidence::{evidence_name, EvidenceSink, EvidenceStage};
use crate::handoff::{decide, HandoffContext, HandoffDecision, HandoffTrigger, RunState};
use crate::learning::{state_key, AuditLog, LearningStore};
use crate::observer::{Incident, ObservedEvent, ObserverChannel, ProgressCounter};
use crate::report::{Finding, RunReport, StepOutcome, StepStatus};
use crate::step::{Step, StepKind};
use crate::watchdog::{WatchdogState, WatchdogThresholds};

/// Run a driver future with an outer bound of `timeout` plus [`CALL_SLACK`],
/// so a driver that ignores its own timeout still cannot hang the run.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> DriverResult<T>
where
    F: Future<Output = DriverResult<T>>,
{
    match tokio::time::timeout(timeout + CALL_SLACK, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::timeout("driver call exceeded its ceiling", timeout)),
    }
}

/// External capabilities the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub driver: Arc<dyn BrowserDriver>,
    pub observer: Arc<dyn ObserverChannel>,
    pub evidence: Arc<dyn EvidenceSink>,
    pub store: LearningStore,
    pub audit: AuditLog,
}

/// Borrowed collaborators plus the mutable state of one run.
pub struct RunContext<'a> {
    pub config: &'a EngineConfig,
    pub deps: &'a Collaborators,
    pub budget: RunBudget,
    pub watchdog: WatchdogState,
    pub progress: ProgressCounter,
    pub state: RunState,
    pub report: RunReport,
    /// Index of the step that triggered the latest handoff.
    pub handoff_index: Option<usize>,
    /// Value for the report's handoff summary.
    pub learning_capture: String,
}

impl<'a> RunContext<'a> {
    pub fn new(
        config: &'a EngineConfig,
        deps: &'a Collaborators,
        report: RunReport,
        started: Instant,
    ) -> Self {
        Self {
            config,
            deps,
            budget: RunBudget::new(config, started),
            watchdog: WatchdogState::new(WatchdogThresholds::from_config(config), started),
            progress: ProgressCounter::new(),
            state: RunState::new(),
            report,
            handoff_index: None,
            learning_capture: "disabled".to_string(),
        }
    }

    // =========================================================================
    // Observer
    // =========================================================================

    /// Poll the observer once and fold the snapshot into the progress
    /// counter, the watchdog, and the report's findings. Returns the events
    /// that no earlier poll had seen.
    pub async fn poll_new_events(&mut self) -> Vec<ObservedEvent> {
        let ceiling = self
            .budget
            .grace_timeout(self.config.observer_poll_ceiling, Instant::now());
        let snapshot = match tokio::time::timeout(ceiling, self.deps.observer.poll_state()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                debug!("Observer poll failed: {}", e);
                return Vec::new();
            }
            Err(_) => {
                debug!("Observer poll exceeded {:?}", ceiling);
                return Vec::new();
            }
        };

        let fresh: Vec<ObservedEvent> = self
            .progress
            .unseen(&snapshot)
            .into_iter()
            .cloned()
            .collect();
        let harvest = self.progress.ingest(&snapshot, self.config.event_noise_mode);
        self.report.console_errors.extend(harvest.console_errors);
        self.report.network_findings.extend(harvest.network_findings);
        if self
            .watchdog
            .poll_progress(self.progress.useful_count(), Instant::now())
        {
            debug!("Observer saw {} new useful events", harvest.new_useful);
        }
        fresh
    }

    /// Poll for progress only.
    pub async fn poll_observer(&mut self) {
        let _ = self.poll_new_events().await;
    }

    // =========================================================================
    // Page probes
    // =========================================================================

    /// Page-context key of whatever the browser currently shows, read within
    /// the step and run deadlines. `None` once neither has time left.
    pub async fn current_state_key(&self, step_deadline: Instant) -> Option<String> {
        let timeout = self
            .budget
            .clamp_with(PROBE_CEILING, step_deadline, Instant::now())
            .ready()?;
        Some(self.read_state_key(timeout).await)
    }

    /// Page-context key for work that runs after a deadline fired, bounded
    /// by the run deadline plus the evidence grace.
    pub async fn state_key_with_grace(&self) -> String {
        let timeout = self.budget.grace_timeout(PROBE_CEILING, Instant::now());
        self.read_state_key(timeout).await
    }

    async fn read_state_key(&self, timeout: Duration) -> String {
        let driver = self.deps.driver.as_ref();
        let (url, title) = tokio::join!(
            bounded(timeout, driver.current_url()),
            bounded(timeout, driver.current_title()),
        );
        state_key(&url.unwrap_or_default(), &title.unwrap_or_default())
    }

    /// Whether focus is trapped in a nested frame. Unknown reads as free.
    pub async fn frame_focus_locked(&self, step_deadline: Instant) -> bool {
        let Clamp::Ready(timeout) =
            self.budget
                .clamp_with(PROBE_CEILING, step_deadline, Instant::now())
        else {
            return false;
        };
        bounded(timeout, self.deps.driver.frame_focus_locked(timeout))
            .await
            .unwrap_or(false)
    }

    /// Learned selectors for `step` on the current page. Empty when the
    /// page cannot be keyed before the deadlines.
    pub async fn learned_selectors(&self, step: &Step, step_deadline: Instant) -> Vec<String> {
        if step.kind.is_bulk() {
            return Vec::new();
        }
        match self.current_state_key(step_deadline).await {
            Some(key) => self.deps.store.lookup(&key, step.learning_target()),
            None => {
                debug!("Skipping learned lookup for {}: no budget", step.describe());
                Vec::new()
            }
        }
    }

    // =========================================================================
    // Evidence
    // =========================================================================

    /// Best-effort screenshot for step `index`.
    pub async fn capture_evidence(&mut self, index: usize, kind: StepKind, stage: EvidenceStage) {
        let timeout = self.budget.evidence_timeout(Instant::now());
        if timeout.is_zero() {
            return;
        }
        let name = evidence_name(index, kind, stage);
        match bounded(timeout, self.deps.driver.screenshot(timeout)).await {
            Ok(bytes) => match self.deps.evidence.write(&name, &bytes) {
                Ok(path) => self.report.evidence_paths.push(path),
                Err(e) => warn!("Failed to write evidence {}: {}", name, e),
            },
            Err(e) => warn!("Screenshot {} failed: {}", name, e),
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Run a handoff transition for step `index` and merge it into the run
    /// state and report.
    pub async fn hand_off(
        &mut self,
        index: usize,
        step: &Step,
        trigger: HandoffTrigger,
        attempted: Vec<String>,
    ) -> HandoffDecision {
        let handoff_ctx = HandoffContext::new(
            index,
            step.kind,
            step.signature(index),
            step.learning_target(),
        )
        .with_teaching(self.config.teaching_enabled)
        .with_attempted(attempted);
        let decision = decide(&trigger, &handoff_ctx);

        self.state.apply(&decision);
        self.handoff_index = Some(index);
        self.report.ui_findings.push(decision.finding.clone());
        if let Some(console) = &decision.console_error {
            self.report.console_errors.push(console.clone());
        }
        warn!(
            "Handoff {} at {}: {:?}",
            decision.reason(),
            decision.where_,
            decision.disposition
        );

        if decision.release_control {
            info!("Control released for human operator");
            self.report_incident(&decision).await;
        }
        decision
    }

    async fn report_incident(&self, decision: &HandoffDecision) {
        let timeout = self.budget.grace_timeout(PROBE_CEILING, Instant::now());
        let url = bounded(timeout, self.deps.driver.current_url())
            .await
            .unwrap_or_default();
        let incident = Incident {
            reason: decision.reason().to_string(),
            where_: decision.where_.clone(),
            url,
            finding: decision.finding.clone(),
            teaching: self.config.teaching_enabled,
        };
        let ceiling = self
            .budget
            .grace_timeout(self.config.observer_poll_ceiling, Instant::now());
        match tokio::time::timeout(ceiling, self.deps.observer.report_incident(&incident)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to report incident: {}", e),
            Err(_) => warn!("Incident report exceeded {:?}", ceiling),
        }
    }

    /// The browser runtime disappeared; the run ends as failed.
    pub fn crash(&mut self, index: usize, step: &Step, detail: &str) -> StepOutcome {
        warn!("Browser runtime closed at step {}: {}", index + 1, detail);
        self.state.mark_crashed();
        self.report
            .ui_findings
            .push(Finding::run_crash(step.signature(index), detail));
        StepOutcome::new(index, step, StepStatus::Failed).with_reason("run_crash")
    }
}
