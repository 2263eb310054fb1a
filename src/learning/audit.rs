//! Teaching audit trail.
//!
//! Every selector a human teaches is recorded three ways under
//! `<learning_dir>/audit/`: a JSON record, a Markdown summary for people,
//! and one line in `teaching_log.jsonl`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observer::ObservedEvent;

/// Directory (under the learning dir) holding audit artifacts.
pub const AUDIT_DIR: &str = "audit";

/// Append-only log of all teaching records.
pub const TEACHING_LOG: &str = "teaching_log.jsonl";

/// One captured human correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeachingRecord {
    pub recorded_at: DateTime<Utc>,
    pub state_key: String,
    pub target_key: String,
    /// Target label of the step that could not be completed.
    pub failed_target: String,
    /// Selector persisted to the store.
    pub selector: String,
    /// True when the selector was derived from the event text rather than
    /// taken from the event itself.
    pub derived: bool,
    pub event: ObservedEvent,
    /// Handoff reason that opened the window.
    pub reason: String,
    #[serde(rename = "where")]
    pub where_: String,
    /// Outcome of replaying the intended action, when attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay: Option<String>,
}

impl TeachingRecord {
    fn file_stem(&self) -> String {
        let key = if self.target_key.is_empty() {
            "any"
        } else {
            &self.target_key
        };
        format!("{}_{}", self.recorded_at.format("%Y%m%dT%H%M%S%3fZ"), key)
    }

    fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!("# Teaching record: {}\n\n", self.failed_target));
        md.push_str(&format!("- Recorded: {}\n", self.recorded_at.to_rfc3339()));
        md.push_str(&format!("- Page: `{}`\n", self.state_key));
        md.push_str(&format!("- Target key: `{}`\n", self.target_key));
        md.push_str(&format!("- Handoff: {} at `{}`\n", self.reason, self.where_));
        md.push_str(&format!(
            "- Learned selector: `{}`{}\n",
            self.selector,
            if self.derived { " (derived from text)" } else { "" }
        ));
        if let Some(replay) = &self.replay {
            md.push_str(&format!("- Replay: {replay}\n"));
        }
        md.push_str("\n## Observed event\n\n");
        md.push_str(&format!("- type: {}\n", self.event.kind));
        md.push_str(&format!("- selector: `{}`\n", self.event.selector));
        md.push_str(&format!("- text: {}\n", self.event.text));
        if !self.event.url.is_empty() {
            md.push_str(&format!("- url: {}\n", self.event.url));
        }
        md
    }
}

/// Writer for teaching audit artifacts.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    /// Audit log under `learning_dir/audit`.
    #[must_use]
    pub fn new(learning_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: learning_dir.as_ref().join(AUDIT_DIR),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(TEACHING_LOG)
    }

    /// Write the record and return the JSON and Markdown paths.
    pub fn write(&self, record: &TeachingRecord) -> anyhow::Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir)?;
        let stem = record.file_stem();

        let json_path = self.dir.join(format!("{stem}.json"));
        fs::write(&json_path, serde_json::to_string_pretty(record)?)?;

        let md_path = self.dir.join(format!("{stem}.md"));
        fs::write(&md_path, record.to_markdown())?;

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        writeln!(log, "{}", serde_json::to_string(record)?)?;

        Ok(vec![json_path, md_path])
    }

    /// All records from the log, oldest first. Unreadable lines are skipped.
    pub fn records(&self) -> anyhow::Result<Vec<TeachingRecord>> {
        let content = match fs::read_to_string(self.log_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> TeachingRecord {
        TeachingRecord {
            recorded_at: Utc::now(),
            state_key: "player.example.com/room|now playing".into(),
            target_key: "stop".into(),
            failed_target: "Stop".into(),
            selector: "#transport-stop".into(),
            derived: false,
            event: ObservedEvent::click("#transport-stop", "Stop"),
            reason: "interactive_timeout".into(),
            where_: "0:click_text:Stop".into(),
            replay: None,
        }
    }

    #[test]
    fn test_write_creates_json_markdown_and_log_line() {
        let temp = TempDir::new().unwrap();
        let audit = AuditLog::new(temp.path());

        let paths = audit.write(&record()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.exists()));
        assert!(paths[0].to_string_lossy().ends_with("_stop.json"));

        let md = std::fs::read_to_string(&paths[1]).unwrap();
        assert!(md.contains("`#transport-stop`"));

        audit.write(&record()).unwrap();
        let records = audit.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].selector, "#transport-stop");
    }

    #[test]
    fn test_records_empty_without_log() {
        let temp = TempDir::new().unwrap();
        assert!(AuditLog::new(temp.path()).records().unwrap().is_empty());
    }
}
