//! Observer channel.
//!
//! The human operator is not a process the engine controls, so their
//! actions are observed by polling a control agent for recently observed
//! page events. This module defines that poll interface, the event model,
//! and the policy deciding which events count as progress.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::EventNoiseMode;
use crate::report::Finding;

/// Event types that are direct user or agent interactions.
const INTERACTION_TYPES: &[&str] = &["click", "dblclick", "input", "change", "submit", "keydown"];

/// Event types that mean the page moved somewhere.
const NAVIGATION_TYPES: &[&str] = &["navigation", "navigate", "url_change", "load"];

/// DOM mutation events; only progress outside debug noise mode.
const MUTATION_TYPES: &[&str] = &["mutation", "dom_mutation"];

/// Marker carried by the control UI's own elements.
const CONTROL_UI_MARKERS: &[&str] = &["data-pagepilot-control", "#pagepilot-", ".pagepilot-"];

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

/// One event seen by the control agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    pub created_at: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub status: String,
}

impl ObservedEvent {
    /// A click event, mostly for tests and manual teaching.
    pub fn click(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: "click".to_string(),
            selector: selector.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    /// Identity used to tell new events from ones already seen.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.kind, self.selector, self.target, self.text, self.created_at
        )
    }

    /// True for interactions with the control UI itself.
    #[must_use]
    pub fn is_control_ui(&self) -> bool {
        self.kind.starts_with("control_")
            || self.target.starts_with("pagepilot-control")
            || CONTROL_UI_MARKERS
                .iter()
                .any(|marker| self.selector.contains(marker))
    }

    /// Whether this event counts as useful progress under `mode`.
    #[must_use]
    pub fn is_useful(&self, mode: EventNoiseMode) -> bool {
        if self.is_control_ui() {
            return false;
        }
        let kind = self.kind.as_str();
        if INTERACTION_TYPES.contains(&kind) || NAVIGATION_TYPES.contains(&kind) {
            return true;
        }
        mode == EventNoiseMode::Default && MUTATION_TYPES.contains(&kind)
    }

    /// Console error reported by the page.
    #[must_use]
    pub fn is_console_error(&self) -> bool {
        self.kind == "console_error"
            || (self.kind == "console" && self.status.eq_ignore_ascii_case("error"))
    }

    /// Failed network request.
    #[must_use]
    pub fn is_network_failure(&self) -> bool {
        if self.kind == "network_error" {
            return true;
        }
        matches!(self.kind.as_str(), "network" | "response" | "request")
            && self.status.parse::<u16>().is_ok_and(|code| code >= 400)
    }

    /// The structured finding for a network failure.
    #[must_use]
    pub fn network_finding(&self) -> Finding {
        let what = if self.status.is_empty() {
            "network_error".to_string()
        } else {
            format!("http_{}", self.status)
        };
        Finding::new(
            what,
            if self.url.is_empty() { "n/a" } else { &self.url },
            if self.message.is_empty() {
                "request failed while the page was being driven"
            } else {
                &self.message
            },
            Vec::new(),
            "check the backend or retry once the service recovers",
        )
    }
}

/// One poll result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverSnapshot {
    #[serde(default, rename = "recentEvents", alias = "recent_events")]
    pub recent_events: Vec<ObservedEvent>,
    #[serde(default, rename = "agentOnline", alias = "agent_online")]
    pub agent_online: bool,
    #[serde(default, rename = "incidentOpen", alias = "incident_open")]
    pub incident_open: bool,
}

/// A handoff report sent to the control agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub reason: String,
    #[serde(rename = "where")]
    pub where_: String,
    pub url: String,
    pub finding: Finding,
    pub teaching: bool,
}

/// Poll interface to the control agent.
///
/// Implementations must be callable repeatedly; the engine bounds each call
/// with the configured poll ceiling.
#[async_trait]
pub trait ObserverChannel: Send + Sync {
    /// Fetch the recently observed events.
    async fn poll_state(&self) -> anyhow::Result<ObserverSnapshot>;

    /// Tell the control agent that automation released control.
    async fn report_incident(&self, _incident: &Incident) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Observer for runs without a control agent; never reports events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

#[async_trait]
impl ObserverChannel for NullObserver {
    async fn poll_state(&self) -> anyhow::Result<ObserverSnapshot> {
        Ok(ObserverSnapshot::default())
    }
}

/// Observer reading snapshots from a JSON file maintained by a control agent.
///
/// A missing file reads as an empty snapshot; incidents are appended as JSON
/// lines to `<file>.incidents.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonFileObserver {
    path: PathBuf,
}

impl JsonFileObserver {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn incidents_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".incidents.jsonl");
        PathBuf::from(name)
    }
}

#[async_trait]
impl ObserverChannel for JsonFileObserver {
    async fn poll_state(&self) -> anyhow::Result<ObserverSnapshot> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(ObserverSnapshot::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(ObserverSnapshot::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn report_incident(&self, incident: &Incident) -> anyhow::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut line = serde_json::to_string(incident)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.incidents_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// What a poll contributed beyond what had been seen before.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Harvest {
    /// Newly seen useful events.
    pub new_useful: u64,
    /// Newly seen console error messages.
    pub console_errors: Vec<String>,
    /// Newly seen network failures.
    pub network_findings: Vec<Finding>,
}

/// Monotonic count of distinct useful events.
///
/// `recent_events` is a sliding window, so its length can stay flat while
/// new events arrive. Counting distinct fingerprints keeps the value fed to
/// the watchdog strictly non-decreasing.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    seen: HashSet<String>,
    useful: u64,
}

impl ProgressCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total distinct useful events seen so far.
    #[must_use]
    pub fn useful_count(&self) -> u64 {
        self.useful
    }

    /// Events in `snapshot` not seen by any earlier poll.
    #[must_use]
    pub fn unseen<'a>(&self, snapshot: &'a ObserverSnapshot) -> Vec<&'a ObservedEvent> {
        snapshot
            .recent_events
            .iter()
            .filter(|event| !self.seen.contains(&event.fingerprint()))
            .collect()
    }

    /// Fold a snapshot into the counter.
    pub fn ingest(&mut self, snapshot: &ObserverSnapshot, mode: EventNoiseMode) -> Harvest {
        let mut harvest = Harvest::default();
        for event in &snapshot.recent_events {
            if !self.seen.insert(event.fingerprint()) {
                continue;
            }
            if event.is_useful(mode) {
                self.useful += 1;
                harvest.new_useful += 1;
            }
            if event.is_console_error() {
                let message = if event.message.is_empty() {
                    event.text.clone()
                } else {
                    event.message.clone()
                };
                harvest.console_errors.push(format!("console: {message}"));
            }
            if event.is_network_failure() {
                harvest.network_findings.push(event.network_finding());
            }
        }
        harvest
    }
}
