//! Step model.
//!
//! Steps are immutable descriptors produced by the task parser and consumed
//! strictly in order by the execution loop. A step carries no behavior of
//! its own; the engine dispatches on [`StepKind`] with exhaustive matches.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PilotError, Result};

/// The closed set of interaction kinds the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Click the element matched by a CSS/driver selector.
    ClickSelector,
    /// Click the element whose visible text matches.
    ClickText,
    /// Like `ClickText`, but a missing target is not an error.
    MaybeClickText,
    /// Click the `value`-text button inside every card matched by `target`.
    BulkClickInCards,
    /// Click the first match of `target` until no matches remain.
    BulkClickUntilEmpty,
    /// Fill the input matched by `target` with `value`.
    FillSelector,
    /// Choose the option labelled `value` in the select matched by `target`.
    SelectLabel,
    /// Choose the option with value `value` in the select matched by `target`.
    SelectValue,
    /// Wait until the element matched by `target` is visible.
    WaitSelector,
    /// Wait until the text `target` is visible.
    WaitText,
}

impl StepKind {
    /// All step kinds, in declaration order.
    pub const ALL: [StepKind; 10] = [
        Self::ClickSelector,
        Self::ClickText,
        Self::MaybeClickText,
        Self::BulkClickInCards,
        Self::BulkClickUntilEmpty,
        Self::FillSelector,
        Self::SelectLabel,
        Self::SelectValue,
        Self::WaitSelector,
        Self::WaitText,
    ];

    /// Wire name of this kind (matches the serde representation).
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClickSelector => "click_selector",
            Self::ClickText => "click_text",
            Self::MaybeClickText => "maybe_click_text",
            Self::BulkClickInCards => "bulk_click_in_cards",
            Self::BulkClickUntilEmpty => "bulk_click_until_empty",
            Self::FillSelector => "fill_selector",
            Self::SelectLabel => "select_label",
            Self::SelectValue => "select_value",
            Self::WaitSelector => "wait_selector",
            Self::WaitText => "wait_text",
        }
    }

    /// Interactive steps go through the retry orchestrator.
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        !self.is_wait()
    }

    /// Wait steps are dispatched directly, without candidate fallback.
    #[must_use]
    pub fn is_wait(&self) -> bool {
        matches!(self, Self::WaitSelector | Self::WaitText)
    }

    /// Failures of optional steps are non-fatal; the step is skipped.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::MaybeClickText)
    }

    /// Kinds whose target is visible text rather than a selector.
    #[must_use]
    pub fn targets_text(&self) -> bool {
        matches!(self, Self::ClickText | Self::MaybeClickText | Self::WaitText)
    }

    /// Kinds that click (single or bulk).
    #[must_use]
    pub fn is_click(&self) -> bool {
        matches!(
            self,
            Self::ClickSelector
                | Self::ClickText
                | Self::MaybeClickText
                | Self::BulkClickInCards
                | Self::BulkClickUntilEmpty
        )
    }

    /// Kinds that act on many elements at once.
    #[must_use]
    pub fn is_bulk(&self) -> bool {
        matches!(self, Self::BulkClickInCards | Self::BulkClickUntilEmpty)
    }

    /// Kinds that must probe whether the target exists before acting.
    #[must_use]
    pub fn needs_applicability_probe(&self) -> bool {
        self.is_optional() || self.is_bulk()
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for StepKind {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s.trim())
            .ok_or_else(|| PilotError::Plan {
                message: format!("unknown step kind '{s}'"),
            })
    }
}

/// One parsed unit of intended interaction.
///
/// # Example
///
/// ```
/// use pagepilot::step::{Step, StepKind};
///
/// let step = Step::new(StepKind::SelectLabel, "#lang", "ES");
/// assert_eq!(step.signature(1), "1:select_label:#lang");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    pub target: String,
    #[serde(default)]
    pub value: String,
}

impl Step {
    /// Create a step with an explicit value.
    pub fn new(kind: StepKind, target: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            value: value.into(),
        }
    }

    /// Create a step that has no value (clicks and waits).
    pub fn bare(kind: StepKind, target: impl Into<String>) -> Self {
        Self::new(kind, target, "")
    }

    /// The same step with a different target, used for fallback candidates.
    #[must_use]
    pub fn retarget(&self, kind: StepKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            value: self.value.clone(),
        }
    }

    /// Signature used by the watchdog to notice step changes.
    #[must_use]
    pub fn signature(&self, index: usize) -> String {
        format!("{}:{}:{}", index, self.kind, self.target)
    }

    /// The label a human would recognise as "what we were trying to hit".
    ///
    /// For bulk card clicks the button text is the teachable part; every
    /// other kind teaches its target.
    #[must_use]
    pub fn learning_target(&self) -> &str {
        match self.kind {
            StepKind::BulkClickInCards if !self.value.is_empty() => &self.value,
            _ => &self.target,
        }
    }

    /// Short human-readable description for logs and findings.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.value.is_empty() {
            format!("{} {:?}", self.kind, self.target)
        } else {
            format!("{} {:?}={:?}", self.kind, self.target, self.value)
        }
    }
}

/// An ordered list of steps, as handed over by the task parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPlan {
    /// Page the steps are meant for, informational only.
    #[serde(default)]
    pub url: Option<String>,
    pub steps: Vec<Step>,
}

impl StepPlan {
    /// Parse a plan from JSON. Accepts either `{"steps": [...]}` or a bare
    /// array of steps.
    pub fn from_json(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let plan = if value.is_array() {
            StepPlan {
                url: None,
                steps: serde_json::from_value(value)?,
            }
        } else {
            serde_json::from_value(value)?
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Load a plan file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Reject steps with no target, or value-bearing kinds without a value.
    pub fn validate(&self) -> Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            if step.target.trim().is_empty() {
                return Err(PilotError::Plan {
                    message: format!("step {} ({}) has an empty target", index + 1, step.kind),
                });
            }
            let needs_value = matches!(
                step.kind,
                StepKind::FillSelector
                    | StepKind::SelectLabel
                    | StepKind::SelectValue
                    | StepKind::BulkClickInCards
            );
            if needs_value && step.value.is_empty() {
                return Err(PilotError::Plan {
                    message: format!("step {} ({}) requires a value", index + 1, step.kind),
                });
            }
        }
        Ok(())
    }

    /// Number of steps in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_roundtrip_through_from_str() {
        for kind in StepKind::ALL {
            assert_eq!(kind.name().parse::<StepKind>().unwrap(), kind);
        }
        assert!("hover_selector".parse::<StepKind>().is_err());
    }

    #[test]
    fn test_kind_classification() {
        assert!(StepKind::ClickSelector.is_interactive());
        assert!(StepKind::WaitText.is_wait());
        assert!(!StepKind::WaitSelector.is_interactive());
        assert!(StepKind::MaybeClickText.is_optional());
        assert!(StepKind::BulkClickUntilEmpty.needs_applicability_probe());
        assert!(!StepKind::FillSelector.needs_applicability_probe());
        assert!(StepKind::ClickText.targets_text());
        assert!(!StepKind::SelectLabel.is_click());
    }

    #[test]
    fn test_signature_changes_with_index_kind_and_target() {
        let step = Step::bare(StepKind::ClickSelector, "#go");
        assert_eq!(step.signature(0), "0:click_selector:#go");
        assert_ne!(step.signature(0), step.signature(1));
        assert_ne!(
            step.signature(0),
            Step::bare(StepKind::ClickText, "#go").signature(0)
        );
    }

    #[test]
    fn test_learning_target_for_cards_is_button_text() {
        let step = Step::new(StepKind::BulkClickInCards, ".card", "Add");
        assert_eq!(step.learning_target(), "Add");
        let step = Step::bare(StepKind::ClickText, "Stop");
        assert_eq!(step.learning_target(), "Stop");
    }

    #[test]
    fn test_retarget_keeps_value() {
        let step = Step::new(StepKind::FillSelector, "div:nth-child(3) input", "hello");
        let alt = step.retarget(StepKind::FillSelector, "[aria-label=\"Search\"]");
        assert_eq!(alt.value, "hello");
        assert_eq!(alt.target, "[aria-label=\"Search\"]");
    }

    #[test]
    fn test_plan_from_json_object_and_array() {
        let plan = StepPlan::from_json(
            r##"{"url": "https://example.com", "steps": [
                {"kind": "click_selector", "target": "#go"},
                {"kind": "select_label", "target": "#lang", "value": "ES"},
                {"kind": "wait_text", "target": "Bienvenido"}
            ]}"##,
        )
        .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.steps[1].value, "ES");

        let bare = StepPlan::from_json(r##"[{"kind": "wait_selector", "target": "#done"}]"##)
            .unwrap();
        assert_eq!(bare.steps[0].kind, StepKind::WaitSelector);
    }

    #[test]
    fn test_plan_rejects_missing_value() {
        let err = StepPlan::from_json(r##"[{"kind": "fill_selector", "target": "#q"}]"##)
            .unwrap_err();
        assert!(err.to_string().contains("requires a value"));
    }

    #[test]
    fn test_plan_rejects_empty_target() {
        let err = StepPlan::from_json(r#"[{"kind": "click_text", "target": "  "}]"#).unwrap_err();
        assert!(matches!(err, PilotError::Plan { .. }));
    }
}
