//! Selector/candidate resolution.
//!
//! Given a step, produce the ordered list of ways to try it:
//!
//! 1. the step as written
//! 2. selectors the learning store remembers for this page and target
//! 3. stable-selector variants (role/label/title based) when the target is
//!    plain text or looks like a generated, position-based selector
//! 4. semantic text hints derived from the selector's words, expanded the
//!    same way
//!
//! First success wins, so the order is the contract. Deliberately generic
//! labels never expand into selector variants: a bare "Play" would match
//! unrelated controls all over the page.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::step::{Step, StepKind};

/// Labels too generic to turn into selectors.
pub const GENERIC_LABELS: &[&str] = &["play", "ok", "go", "yes", "no", "next", "back", "more"];

/// Words found in selectors and the visible label they usually stand for.
const SEMANTIC_HINTS: &[(&str, &str)] = &[
    ("stop", "Stop"),
    ("play", "Play"),
    ("pause", "Pause"),
    ("submit", "Submit"),
    ("save", "Save"),
    ("search", "Search"),
    ("signin", "Sign in"),
    ("login", "Sign in"),
    ("next", "Next"),
    ("close", "Close"),
    ("cancel", "Cancel"),
    ("record", "Record"),
];

const UNSTABLE_PATTERNS: &[&str] = &[
    r":nth-(child|of-type)\(",
    r"^(xpath=|/)",
    r"\.(css|sc|jss|emotion)-[a-z0-9]{4,}",
    r"#[A-Za-z_-]*\d{3,}",
];

fn unstable_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        UNSTABLE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn label_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"aria-label\s*=\s*["']([^"']+)["']"#,
            r#":has-text\(\s*["']([^"']+)["']\s*\)"#,
            r#"title\s*=\s*["']([^"']+)["']"#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Original,
    Learned,
    StableSelector,
    SemanticHint,
}

/// One way to attempt a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub step: Step,
    pub source: CandidateSource,
}

impl Candidate {
    #[must_use]
    pub fn is_original(&self) -> bool {
        self.source == CandidateSource::Original
    }

    /// Selector string to remember when this candidate succeeds.
    ///
    /// Text candidates are stored in driver text-selector form so a later
    /// run can replay them as a selector step.
    #[must_use]
    pub fn learnable_selector(&self) -> String {
        if self.step.kind.targets_text() {
            format!("text={}", self.step.target)
        } else {
            self.step.target.clone()
        }
    }

    /// Short label for attempt trails in findings.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}:{}", self.step.kind, self.step.target)
    }
}

/// True for labels that must not expand into selector variants.
#[must_use]
pub fn is_generic_label(label: &str) -> bool {
    let normalized = label.trim().to_lowercase();
    GENERIC_LABELS.contains(&normalized.as_str())
}

/// True for selectors that depend on position, generated class names, or
/// numeric ids, and so tend to break between page versions.
#[must_use]
pub fn looks_unstable(selector: &str) -> bool {
    let selector = selector.trim();
    selector.matches('>').count() >= 3 || unstable_patterns().iter().any(|re| re.is_match(selector))
}

/// A visible label embedded in a selector, if any.
#[must_use]
pub fn label_from_selector(selector: &str) -> Option<String> {
    label_patterns().iter().find_map(|re| {
        re.captures(selector)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|label| !label.is_empty())
    })
}

/// Visible labels suggested by the words of a selector.
#[must_use]
pub fn semantic_hints(selector: &str) -> Vec<&'static str> {
    let lowered = selector.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut hints = Vec::new();
    for (word, label) in SEMANTIC_HINTS {
        let hit = tokens
            .iter()
            .any(|t| t.starts_with(word) || t.ends_with(word));
        if hit && !hints.contains(label) {
            hints.push(*label);
        }
    }
    hints
}

/// Selector variants that locate a button by its accessible label.
#[must_use]
pub fn stable_click_variants(label: &str) -> Vec<String> {
    if label.trim().is_empty() || is_generic_label(label) {
        return Vec::new();
    }
    let label = label.trim().replace('"', "\\\"");
    vec![
        format!("role=button[name=\"{label}\"]"),
        format!("[aria-label=\"{label}\"]"),
        format!("[title=\"{label}\"]"),
    ]
}

fn stable_fill_variants(label: &str) -> Vec<String> {
    if label.trim().is_empty() {
        return Vec::new();
    }
    let label = label.trim().replace('"', "\\\"");
    vec![
        format!("[aria-label=\"{label}\"]"),
        format!("[placeholder=\"{label}\"]"),
    ]
}

/// Kind a learned selector is replayed as, for a step of `kind`.
#[must_use]
pub fn learned_kind(kind: StepKind) -> Option<StepKind> {
    match kind {
        StepKind::ClickSelector | StepKind::ClickText | StepKind::MaybeClickText => {
            Some(StepKind::ClickSelector)
        }
        StepKind::FillSelector => Some(StepKind::FillSelector),
        StepKind::SelectLabel => Some(StepKind::SelectLabel),
        StepKind::SelectValue => Some(StepKind::SelectValue),
        StepKind::WaitSelector | StepKind::WaitText => Some(StepKind::WaitSelector),
        StepKind::BulkClickInCards | StepKind::BulkClickUntilEmpty => None,
    }
}

struct CandidateList {
    seen: HashSet<(StepKind, String)>,
    items: Vec<Candidate>,
}

impl CandidateList {
    fn push(&mut self, step: Step, source: CandidateSource) {
        if step.target.trim().is_empty() {
            return;
        }
        if self.seen.insert((step.kind, step.target.clone())) {
            self.items.push(Candidate { step, source });
        }
    }
}

/// Ordered fallback candidates for `step`, given the selectors the learning
/// store returned for its page context and target.
#[must_use]
pub fn build_candidates(step: &Step, learned: &[String]) -> Vec<Candidate> {
    let mut list = CandidateList {
        seen: HashSet::new(),
        items: Vec::new(),
    };
    list.push(step.clone(), CandidateSource::Original);

    if let Some(kind) = learned_kind(step.kind) {
        for selector in learned {
            list.push(step.retarget(kind, selector.as_str()), CandidateSource::Learned);
        }
    }

    match step.kind {
        StepKind::ClickText | StepKind::MaybeClickText => {
            for variant in stable_click_variants(&step.target) {
                list.push(
                    step.retarget(StepKind::ClickSelector, variant),
                    CandidateSource::StableSelector,
                );
            }
        }
        StepKind::ClickSelector => {
            if looks_unstable(&step.target) {
                if let Some(label) = label_from_selector(&step.target) {
                    list.push(
                        step.retarget(StepKind::ClickText, label.as_str()),
                        CandidateSource::StableSelector,
                    );
                    for variant in stable_click_variants(&label) {
                        list.push(
                            step.retarget(StepKind::ClickSelector, variant),
                            CandidateSource::StableSelector,
                        );
                    }
                }
            }
            for hint in semantic_hints(&step.target) {
                list.push(
                    step.retarget(StepKind::ClickText, hint),
                    CandidateSource::SemanticHint,
                );
                for variant in stable_click_variants(hint) {
                    list.push(
                        step.retarget(StepKind::ClickSelector, variant),
                        CandidateSource::SemanticHint,
                    );
                }
            }
        }
        StepKind::FillSelector => {
            if looks_unstable(&step.target) {
                if let Some(label) = label_from_selector(&step.target) {
                    for variant in stable_fill_variants(&label) {
                        list.push(
                            step.retarget(StepKind::FillSelector, variant),
                            CandidateSource::StableSelector,
                        );
                    }
                }
            }
        }
        StepKind::BulkClickInCards
        | StepKind::BulkClickUntilEmpty
        | StepKind::SelectLabel
        | StepKind::SelectValue
        | StepKind::WaitSelector
        | StepKind::WaitText => {}
    }

    list.items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(candidates: &[Candidate]) -> Vec<String> {
        candidates.iter().map(Candidate::describe).collect()
    }

    #[test]
    fn test_original_always_first() {
        let step = Step::bare(StepKind::ClickSelector, "#go");
        let candidates = build_candidates(&step, &["#go-learned".to_string()]);
        assert!(candidates[0].is_original());
        assert_eq!(candidates[0].step, step);
        assert_eq!(candidates[1].source, CandidateSource::Learned);
        assert_eq!(candidates[1].step.target, "#go-learned");
    }

    #[test]
    fn test_learned_selectors_precede_heuristics_for_text_click() {
        let step = Step::bare(StepKind::ClickText, "Stop");
        let learned = vec!["#transport-stop".to_string()];
        let candidates = build_candidates(&step, &learned);
        assert_eq!(
            targets(&candidates),
            vec![
                "click_text:Stop",
                "click_selector:#transport-stop",
                "click_selector:role=button[name=\"Stop\"]",
                "click_selector:[aria-label=\"Stop\"]",
                "click_selector:[title=\"Stop\"]",
            ]
        );
    }

    #[test]
    fn test_generic_label_never_expands_to_selectors() {
        let step = Step::bare(StepKind::ClickText, "Play");
        let candidates = build_candidates(&step, &[]);
        assert_eq!(candidates.len(), 1);
        assert!(stable_click_variants(" OK ").is_empty());
    }

    #[test]
    fn test_semantic_hint_from_selector_words() {
        let step = Step::bare(StepKind::ClickSelector, "#transport-stop");
        let candidates = build_candidates(&step, &[]);
        let described = targets(&candidates);
        assert_eq!(described[0], "click_selector:#transport-stop");
        assert!(described.contains(&"click_text:Stop".to_string()));
        assert!(described.contains(&"click_selector:role=button[name=\"Stop\"]".to_string()));
        assert!(candidates
            .iter()
            .skip(1)
            .all(|c| c.source == CandidateSource::SemanticHint));
    }

    #[test]
    fn test_generic_hint_keeps_text_candidate_only() {
        let step = Step::bare(StepKind::ClickSelector, ".player-play");
        let described = targets(&build_candidates(&step, &[]));
        assert_eq!(described, vec!["click_selector:.player-play", "click_text:Play"]);
    }

    #[test]
    fn test_unstable_selector_detection() {
        assert!(looks_unstable("div > ul > li > a"));
        assert!(looks_unstable("ul li:nth-child(3)"));
        assert!(looks_unstable("//button[1]"));
        assert!(looks_unstable("button.css-1x2y3z"));
        assert!(looks_unstable("#ember1234"));
        assert!(!looks_unstable("#transport-stop"));
        assert!(!looks_unstable("button[data-testid=save]"));
    }

    #[test]
    fn test_unstable_selector_with_label_gets_stable_variants() {
        let step = Step::bare(
            StepKind::ClickSelector,
            "div:nth-child(2) button[aria-label='Record']",
        );
        let described = targets(&build_candidates(&step, &[]));
        assert_eq!(described[1], "click_text:Record");
        assert!(described.contains(&"click_selector:[title=\"Record\"]".to_string()));
    }

    #[test]
    fn test_duplicates_removed() {
        let step = Step::bare(StepKind::ClickSelector, "#go");
        let learned = vec!["#go".to_string(), "#alt".to_string(), "#alt".to_string()];
        let described = targets(&build_candidates(&step, &learned));
        assert_eq!(described, vec!["click_selector:#go", "click_selector:#alt"]);
    }

    #[test]
    fn test_bulk_steps_only_original() {
        let step = Step::new(StepKind::BulkClickInCards, ".card", "Add");
        assert_eq!(build_candidates(&step, &["#x".to_string()]).len(), 1);
    }

    #[test]
    fn test_fill_learned_keeps_value() {
        let step = Step::new(StepKind::FillSelector, "#q", "rust");
        let candidates = build_candidates(&step, &["input[name=q]".to_string()]);
        assert_eq!(candidates[1].step.kind, StepKind::FillSelector);
        assert_eq!(candidates[1].step.value, "rust");
    }

    #[test]
    fn test_learnable_selector_forms() {
        let text = Candidate {
            step: Step::bare(StepKind::ClickText, "Stop"),
            source: CandidateSource::SemanticHint,
        };
        assert_eq!(text.learnable_selector(), "text=Stop");
        let sel = Candidate {
            step: Step::bare(StepKind::ClickSelector, "#a"),
            source: CandidateSource::Learned,
        };
        assert_eq!(sel.learnable_selector(), "#a");
    }
}
