//! Evidence capture.
//!
//! Screenshots are best-effort: a failing sink is logged and ignored, it
//! never changes the outcome of a run.

use std::path::{Path, PathBuf};

use crate::step::StepKind;

/// Stage of a step a screenshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceStage {
    Before,
    After,
    /// After the scroll nudge of retry round `n` (1-based).
    Retry(u32),
    Timeout,
    Stuck,
    /// After replaying a human-taught selector.
    Replay,
}

impl EvidenceStage {
    #[must_use]
    pub fn suffix(&self) -> String {
        match self {
            Self::Before => "before".to_string(),
            Self::After => "after".to_string(),
            Self::Retry(round) => format!("retry{round}"),
            Self::Timeout => "timeout".to_string(),
            Self::Stuck => "stuck".to_string(),
            Self::Replay => "replay".to_string(),
        }
    }
}

/// File name for a step screenshot, e.g. `step_01_click_selector_before.png`.
#[must_use]
pub fn evidence_name(index: usize, kind: StepKind, stage: EvidenceStage) -> String {
    format!("step_{:02}_{}_{}.png", index + 1, kind, stage.suffix())
}

/// Destination for evidence artifacts.
pub trait EvidenceSink: Send + Sync {
    /// Store `bytes` under `name` and return where they ended up.
    fn write(&self, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf>;
}

/// Writes evidence files into a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct FsEvidenceSink {
    dir: PathBuf,
}

impl FsEvidenceSink {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl EvidenceSink for FsEvidenceSink {
    fn write(&self, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_evidence_names() {
        assert_eq!(
            evidence_name(0, StepKind::ClickSelector, EvidenceStage::Before),
            "step_01_click_selector_before.png"
        );
        assert_eq!(
            evidence_name(9, StepKind::ClickText, EvidenceStage::Retry(2)),
            "step_10_click_text_retry2.png"
        );
        assert!(evidence_name(1, StepKind::FillSelector, EvidenceStage::Timeout)
            .ends_with("_timeout.png"));
    }

    #[test]
    fn test_fs_sink_creates_dir() {
        let temp = TempDir::new().unwrap();
        let sink = FsEvidenceSink::new(temp.path().join("evidence"));
        let path = sink.write("a.png", b"\x89PNG").unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(path).unwrap(), b"\x89PNG");
    }
}
