//! Run report model and sinks.
//!
//! Every non-success path attaches a [`Finding`] with the same five fields,
//! and the final report back-fills empty finding lists with a neutral entry
//! so consumers never need conditional field-presence logic.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::step::{Step, StepKind};

/// Structured explanation of something that went wrong (or, neutrally, of
/// nothing going wrong).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub what_failed: String,
    #[serde(rename = "where")]
    pub where_: String,
    pub why_likely: String,
    pub attempted: Vec<String>,
    pub next_best_action: String,
}

impl Finding {
    pub fn new(
        what_failed: impl Into<String>,
        where_: impl Into<String>,
        why_likely: impl Into<String>,
        attempted: Vec<String>,
        next_best_action: impl Into<String>,
    ) -> Self {
        Self {
            what_failed: what_failed.into(),
            where_: where_.into(),
            why_likely: why_likely.into(),
            attempted,
            next_best_action: next_best_action.into(),
        }
    }

    /// Placeholder used to back-fill empty finding lists.
    #[must_use]
    pub fn neutral() -> Self {
        Self::new("none", "n/a", "n/a", Vec::new(), "none")
    }

    /// True for the back-fill placeholder.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.what_failed == "none"
    }

    /// Finding for a run whose browser runtime disappeared.
    #[must_use]
    pub fn run_crash(where_: impl Into<String>, detail: &str) -> Self {
        Self::new(
            "run_crash",
            where_,
            format!("browser page or runtime closed: {detail}"),
            Vec::new(),
            "restart the browser session and rerun",
        )
    }
}

/// Overall run result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    #[default]
    Success,
    /// A human intervened or non-fatal findings occurred.
    Partial,
    /// Hard error with no recovery path.
    Failed,
}

impl std::fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// How a single step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Executed,
    SkippedNotApplicable,
    Timeout,
    Stuck,
    /// Ended by a non-timeout error (target not found, crash).
    Failed,
}

/// One entry per step, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub kind: StepKind,
    pub target: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StepOutcome {
    #[must_use]
    pub fn new(index: usize, step: &Step, status: StepStatus) -> Self {
        Self {
            index,
            kind: step.kind,
            target: step.target.clone(),
            status,
            reason: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// An action that visibly happened on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub index: usize,
    pub kind: StepKind,
    pub target: String,
    /// Set when a fallback candidate rather than the original target worked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_used: Option<String>,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Summary of a release of control to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffSummary {
    pub reason: String,
    #[serde(rename = "where")]
    pub where_: String,
    /// True once a qualifying human correction was observed.
    pub human_takeover: bool,
    /// `captured:<selector>`, `none`, or `disabled`.
    pub learning_capture: String,
}

/// Aggregate produced at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: RunVerdict,
    pub steps: Vec<StepOutcome>,
    pub actions: Vec<ActionRecord>,
    pub observations: Vec<String>,
    pub console_errors: Vec<String>,
    pub network_findings: Vec<Finding>,
    pub ui_findings: Vec<Finding>,
    pub evidence_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<HandoffSummary>,
}

impl RunReport {
    /// Empty report for a run starting now, with a fresh run id.
    #[must_use]
    pub fn begin() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: now,
            finished_at: now,
            result: RunVerdict::Success,
            steps: Vec::new(),
            actions: Vec::new(),
            observations: Vec::new(),
            console_errors: Vec::new(),
            network_findings: Vec::new(),
            ui_findings: Vec::new(),
            evidence_paths: Vec::new(),
            handoff: None,
        }
    }

    /// Findings that are not back-fill placeholders.
    pub fn real_ui_findings(&self) -> impl Iterator<Item = &Finding> {
        self.ui_findings.iter().filter(|f| !f.is_neutral())
    }

    /// True when a human took over during this run.
    #[must_use]
    pub fn human_took_over(&self) -> bool {
        self.handoff.as_ref().is_some_and(|h| h.human_takeover)
    }

    /// Outcome recorded for step `index`, if it was reached.
    #[must_use]
    pub fn outcome(&self, index: usize) -> Option<&StepOutcome> {
        self.steps.iter().find(|o| o.index == index)
    }
}

/// Receives the final report for persistence.
pub trait ReportSink: Send + Sync {
    fn persist(&self, report: &RunReport) -> anyhow::Result<()>;
}

/// Writes `report.json` into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileReportSink {
    dir: PathBuf,
}

impl JsonFileReportSink {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.dir.join("report.json")
    }
}

impl ReportSink for JsonFileReportSink {
    fn persist(&self, report: &RunReport) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join("report.json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(report)?)?;
        std::fs::rename(&tmp, self.report_path())?;
        Ok(())
    }
}

/// Fill empty finding lists with a neutral entry.
pub fn backfill_findings(findings: &mut Vec<Finding>) {
    if findings.is_empty() {
        findings.push(Finding::neutral());
    }
}

/// Persist through `sink`, logging instead of failing.
pub fn persist_best_effort(sink: &dyn ReportSink, report: &RunReport) {
    if let Err(e) = sink.persist(report) {
        warn!("Failed to persist run report {}: {}", report.run_id, e);
    }
}
