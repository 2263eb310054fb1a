//! End-to-end runs of the engine against scripted collaborators.
//!
//! Every test runs on tokio's paused clock, so timeouts of many seconds
//! complete instantly while keeping their ordering.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::Instant;

use pagepilot::config::EngineConfig;
use pagepilot::deadline::{CALL_SLACK, EVIDENCE_GRACE};
use pagepilot::driver::DriverError;
use pagepilot::engine::Engine;
use pagepilot::learning::{state_key, AuditLog, LearningStore};
use pagepilot::observer::ObservedEvent;
use pagepilot::report::{RunVerdict, StepStatus};
use pagepilot::step::{Step, StepKind, StepPlan};
use pagepilot::testing::{MemoryEvidenceSink, MemoryReportSink, ScriptedDriver, ScriptedObserver};

const PAGE_URL: &str = "https://player.example.com/room";
const PAGE_TITLE: &str = "Now Playing";

fn config_in(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        learning_dir: dir.path().join("learning"),
        evidence_dir: dir.path().join("evidence"),
        ..EngineConfig::default()
    }
}

fn engine(config: EngineConfig, driver: &ScriptedDriver, evidence: &MemoryEvidenceSink) -> Engine {
    Engine::new(config, Arc::new(driver.clone())).with_evidence(Arc::new(evidence.clone()))
}

fn human_click(selector: &str, text: &str) -> ObservedEvent {
    let mut event = ObservedEvent::click(selector, text);
    event.created_at = "2026-10-14T09:30:00Z".to_string();
    event
}

fn stop_click() -> ObservedEvent {
    human_click("#transport-stop", "Stop")
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_cooperative_page_completes_with_evidence_pairs() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_visible("#go")
        .with_visible("#lang")
        .with_visible("text=Bienvenido");
    let evidence = MemoryEvidenceSink::new();

    let steps = [
        Step::bare(StepKind::ClickSelector, "#go"),
        Step::new(StepKind::SelectLabel, "#lang", "ES"),
        Step::bare(StepKind::WaitText, "Bienvenido"),
    ];
    let report = engine(config_in(&dir), &driver, &evidence).run(&steps).await;

    assert_eq!(report.result, RunVerdict::Success);
    assert_eq!(report.steps.len(), 3);
    assert!(report.steps.iter().all(|s| s.status == StepStatus::Executed));
    assert_eq!(
        evidence.names(),
        vec![
            "step_01_click_selector_before.png",
            "step_01_click_selector_after.png",
            "step_02_select_label_before.png",
            "step_02_select_label_after.png",
        ]
    );
    assert_eq!(driver.clicks(), vec!["#go"]);
    assert_eq!(driver.selects().len(), 1);
    assert_eq!(report.actions.len(), 2);
    assert!(report.real_ui_findings().next().is_none());
    assert!(report.handoff.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_hidden_target_times_out_and_fails_without_teaching() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new().with_hidden("text=Stop");
    let evidence = MemoryEvidenceSink::new();
    let started = Instant::now();
    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[Step::bare(StepKind::ClickText, "Stop")])
        .await;
    let elapsed = started.elapsed();

    assert_eq!(report.result, RunVerdict::Failed);
    assert_eq!(report.steps[0].status, StepStatus::Timeout);
    assert!(report.console_errors[0].starts_with("Timeout on interactive step 1"));
    assert!(evidence
        .names()
        .contains(&"step_01_click_text_timeout.png".to_string()));
    assert!(driver.clicks().is_empty());
    // The step hard timeout bounds the step, retries included.
    assert!(elapsed <= Duration::from_secs(46), "took {elapsed:?}");
    assert_eq!(report.ui_findings[0].what_failed, "interactive_timeout");
}

#[tokio::test(start_paused = true)]
async fn test_teaching_learns_replays_and_persists_selector() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_hidden("text=Stop")
        .with_visible("#transport-stop");
    let observer = ScriptedObserver::new().with_event_after_incident(stop_click());
    let evidence = MemoryEvidenceSink::new();
    let config = EngineConfig {
        teaching_enabled: true,
        learning_window: Duration::from_secs(10),
        ..config_in(&dir)
    };
    let learning_dir = config.learning_dir.clone();

    let report = engine(config, &driver, &evidence)
        .with_observer(Arc::new(observer.clone()))
        .run(&[Step::bare(StepKind::ClickText, "Stop")])
        .await;

    assert_eq!(report.result, RunVerdict::Partial);
    assert_eq!(observer.incidents().len(), 1);
    assert_eq!(driver.clicks(), vec!["#transport-stop"]);

    let learned = LearningStore::new(&learning_dir).lookup(&state_key(PAGE_URL, PAGE_TITLE), "Stop");
    assert_eq!(learned, vec!["#transport-stop"]);

    let records = AuditLog::new(&learning_dir).records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].selector, "#transport-stop");
    assert_eq!(records[0].replay.as_deref(), Some("ok"));
    assert!(learning_dir.join("audit").join("teaching_log.jsonl").exists());

    let handoff = report.handoff.as_ref().unwrap();
    assert!(handoff.human_takeover);
    assert_eq!(handoff.learning_capture, "captured:#transport-stop");
    assert!(report
        .observations
        .contains(&"learning_replay=ok".to_string()));
    assert!(evidence
        .names()
        .contains(&"step_01_click_text_replay.png".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_releases_control_quickly() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new().with_hidden("#go");
    let evidence = MemoryEvidenceSink::new();
    let config = EngineConfig {
        run_timeout: Duration::from_millis(100),
        ..config_in(&dir)
    };

    let started = Instant::now();
    let report = engine(config, &driver, &evidence)
        .run(&[
            Step::bare(StepKind::ClickSelector, "#go"),
            Step::bare(StepKind::ClickSelector, "#next"),
        ])
        .await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.result, RunVerdict::Failed);
    assert_eq!(report.steps.len(), 1);
    let finding = report
        .ui_findings
        .iter()
        .find(|f| f.what_failed == "run_timeout")
        .unwrap();
    assert!(finding.why_likely.contains("control released"));
}

#[tokio::test(start_paused = true)]
async fn test_target_clickable_after_two_scrolls_takes_three_attempts() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new().with_clickable_after_scrolls("#go", 2);
    let evidence = MemoryEvidenceSink::new();

    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[Step::bare(StepKind::ClickSelector, "#go")])
        .await;

    assert_eq!(report.result, RunVerdict::Success);
    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].attempts, 3);
    assert_eq!(report.actions[0].selector_used, None);
    assert_eq!(driver.scroll_count(), 2);
    assert_eq!(
        evidence.names(),
        vec![
            "step_01_click_selector_before.png",
            "step_01_click_selector_retry1.png",
            "step_01_click_selector_retry2.png",
            "step_01_click_selector_after.png",
        ]
    );
}

// =========================================================================
// Properties
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_zero_run_timeout_attempts_nothing() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new().with_visible("#go");
    let evidence = MemoryEvidenceSink::new();
    let config = EngineConfig {
        run_timeout: Duration::ZERO,
        ..config_in(&dir)
    };

    let report = engine(config, &driver, &evidence)
        .run(&[Step::bare(StepKind::ClickSelector, "#go")])
        .await;

    assert!(driver.clicks().is_empty());
    assert_eq!(report.steps[0].status, StepStatus::Timeout);
    assert_eq!(report.ui_findings[0].what_failed, "run_timeout");
}

#[tokio::test(start_paused = true)]
async fn test_closed_page_ends_run_as_crash() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_visible("#go")
        .with_visible("#next")
        .with_close_after_clicks(1);
    let evidence = MemoryEvidenceSink::new();

    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[
            Step::bare(StepKind::ClickSelector, "#go"),
            Step::bare(StepKind::ClickSelector, "#next"),
            Step::bare(StepKind::ClickSelector, "#later"),
        ])
        .await;

    assert_eq!(report.result, RunVerdict::Failed);
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps[1].status, StepStatus::Failed);
    assert_eq!(report.steps[1].reason.as_deref(), Some("run_crash"));
    assert!(report.ui_findings.iter().any(|f| f.what_failed == "run_crash"));
}

#[tokio::test(start_paused = true)]
async fn test_optional_step_without_match_is_skipped() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new().with_visible("#go");
    let evidence = MemoryEvidenceSink::new();

    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[
            Step::bare(StepKind::MaybeClickText, "Accept cookies"),
            Step::bare(StepKind::ClickSelector, "#go"),
        ])
        .await;

    assert_eq!(report.result, RunVerdict::Success);
    assert_eq!(report.steps[0].status, StepStatus::SkippedNotApplicable);
    assert_eq!(report.steps[1].status, StepStatus::Executed);
    assert_eq!(driver.clicks(), vec!["#go"]);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_steps_click_every_match() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_count(".queue .remove", 3, true)
        .with_count(".card >> text=Add", 2, false);
    let evidence = MemoryEvidenceSink::new();

    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[
            Step::bare(StepKind::BulkClickUntilEmpty, ".queue .remove"),
            Step::new(StepKind::BulkClickInCards, ".card", "Add"),
        ])
        .await;

    assert_eq!(report.result, RunVerdict::Success);
    let clicks = driver.clicks();
    assert_eq!(clicks.iter().filter(|c| *c == ".queue .remove").count(), 3);
    assert_eq!(clicks.iter().filter(|c| *c == ".card >> text=Add").count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_learned_selector_is_tried_after_original() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    LearningStore::new(&config.learning_dir)
        .remember(&state_key(PAGE_URL, PAGE_TITLE), "Stop", "#transport-stop")
        .unwrap();
    let driver = ScriptedDriver::new().with_visible("#transport-stop");
    let evidence = MemoryEvidenceSink::new();

    let report = engine(config, &driver, &evidence)
        .run(&[Step::bare(StepKind::ClickText, "Stop")])
        .await;

    assert_eq!(report.result, RunVerdict::Success);
    assert_eq!(report.actions[0].attempts, 2);
    assert_eq!(
        report.actions[0].selector_used.as_deref(),
        Some("#transport-stop")
    );
    assert!(report
        .observations
        .contains(&"learned_selector=#transport-stop".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_missing_target_fails_with_not_found_finding() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new().with_error(
        "#go",
        DriverError::NotFound {
            target: "#go".to_string(),
        },
    );
    let evidence = MemoryEvidenceSink::new();

    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[Step::bare(StepKind::ClickSelector, "#go")])
        .await;

    assert_eq!(report.result, RunVerdict::Failed);
    assert_eq!(report.steps[0].status, StepStatus::Failed);
    assert_eq!(report.ui_findings[0].what_failed, "target_not_found");
    assert!(report.ui_findings[0].why_likely.contains("#go"));
}

#[tokio::test(start_paused = true)]
async fn test_trapped_frame_focus_hands_off() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_visible("#go")
        .with_frame_locked(false);
    let evidence = MemoryEvidenceSink::new();

    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[
            Step::bare(StepKind::ClickSelector, "#go"),
            Step::bare(StepKind::ClickSelector, "#go"),
        ])
        .await;

    assert_eq!(report.result, RunVerdict::Partial);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].status, StepStatus::Stuck);
    assert_eq!(report.ui_findings[0].what_failed, "stuck_iframe_focus");
    assert!(driver.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_releasable_frame_focus_is_recovered() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_visible("#go")
        .with_frame_locked(true);
    let evidence = MemoryEvidenceSink::new();

    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[Step::bare(StepKind::ClickSelector, "#go")])
        .await;

    assert_eq!(report.result, RunVerdict::Success);
    assert_eq!(driver.clicks(), vec!["#go"]);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_stuck_opens_window_that_closes_empty() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new().with_hidden("text=Stop");
    let observer = ScriptedObserver::new();
    let evidence = MemoryEvidenceSink::new();
    let config = EngineConfig {
        teaching_enabled: true,
        stuck_interactive_threshold: Duration::from_secs(10),
        learning_window: Duration::from_secs(3),
        ..config_in(&dir)
    };

    let report = engine(config, &driver, &evidence)
        .with_observer(Arc::new(observer.clone()))
        .run(&[
            Step::bare(StepKind::ClickText, "Stop"),
            Step::bare(StepKind::ClickSelector, "#after"),
        ])
        .await;

    assert_eq!(report.result, RunVerdict::Partial);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].status, StepStatus::Stuck);
    assert!(evidence
        .names()
        .contains(&"step_01_click_text_stuck.png".to_string()));
    assert_eq!(observer.incidents().len(), 1);

    let handoff = report.handoff.as_ref().unwrap();
    assert_eq!(handoff.reason, "stuck");
    assert!(!handoff.human_takeover);
    assert_eq!(handoff.learning_capture, "none");
    assert!(report
        .observations
        .contains(&"learning_capture=none".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_run_plan_opens_page_and_persists_report() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new().with_visible("#email");
    let evidence = MemoryEvidenceSink::new();
    let sink = MemoryReportSink::new();

    let plan = StepPlan::from_json(
        r##"{"url": "https://shop.example.com/login",
             "steps": [{"kind": "fill_selector", "target": "#email", "value": "ana@example.com"}]}"##,
    )
    .unwrap();
    let report = engine(config_in(&dir), &driver, &evidence)
        .with_report_sink(Arc::new(sink.clone()))
        .run_plan(&plan)
        .await
        .unwrap();

    assert_eq!(driver.navigations(), vec!["https://shop.example.com/login"]);
    assert_eq!(
        driver.fills(),
        vec![("#email".to_string(), "ana@example.com".to_string())]
    );
    let persisted = sink.reports();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].run_id, report.run_id);
}

#[tokio::test(start_paused = true)]
async fn test_failing_evidence_sink_does_not_change_outcome() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new().with_visible("#go");
    let evidence = MemoryEvidenceSink::failing();

    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[Step::bare(StepKind::ClickSelector, "#go")])
        .await;

    assert_eq!(report.result, RunVerdict::Success);
    assert!(report.evidence_paths.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_page_info_cannot_outlast_run_deadline() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_hidden("#go")
        .with_stalled_page_info(Duration::from_secs(3600));
    let evidence = MemoryEvidenceSink::new();
    let config = EngineConfig {
        run_timeout: Duration::from_millis(100),
        ..config_in(&dir)
    };

    let started = Instant::now();
    let report = engine(config, &driver, &evidence)
        .run(&[Step::bare(StepKind::ClickSelector, "#go")])
        .await;
    let elapsed = started.elapsed();

    // Only the post-deadline incident report may use the grace period.
    let ceiling = Duration::from_millis(100) + EVIDENCE_GRACE + CALL_SLACK;
    assert!(elapsed <= ceiling, "took {elapsed:?}");
    assert_eq!(report.result, RunVerdict::Failed);
    assert!(report.ui_findings.iter().any(|f| f.what_failed == "run_timeout"));
    assert!(driver.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_target_with_teaching_learns_and_resumes() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_error(
            "#checkout",
            DriverError::NotFound {
                target: "#checkout".to_string(),
            },
        )
        .with_visible("#checkout-now")
        .with_visible("#done");
    let observer =
        ScriptedObserver::new().with_event_after_incident(human_click("#checkout-now", ""));
    let evidence = MemoryEvidenceSink::new();
    let config = EngineConfig {
        teaching_enabled: true,
        learning_window: Duration::from_secs(10),
        ..config_in(&dir)
    };
    let learning_dir = config.learning_dir.clone();

    let report = engine(config, &driver, &evidence)
        .with_observer(Arc::new(observer.clone()))
        .run(&[
            Step::bare(StepKind::ClickSelector, "#checkout"),
            Step::bare(StepKind::ClickSelector, "#done"),
        ])
        .await;

    assert_eq!(report.result, RunVerdict::Partial);
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps[0].status, StepStatus::Failed);
    assert_eq!(report.steps[0].reason.as_deref(), Some("target_not_found"));
    assert_eq!(report.steps[1].status, StepStatus::Executed);
    assert_eq!(driver.clicks(), vec!["#checkout-now", "#done"]);
    assert_eq!(report.ui_findings[0].what_failed, "target_not_found");

    let learned =
        LearningStore::new(&learning_dir).lookup(&state_key(PAGE_URL, PAGE_TITLE), "#checkout");
    assert_eq!(learned, vec!["#checkout-now"]);

    let handoff = report.handoff.as_ref().unwrap();
    assert_eq!(handoff.reason, "target_not_found");
    assert!(handoff.human_takeover);
}

#[tokio::test(start_paused = true)]
async fn test_focus_trapped_during_retries_is_stuck_in_frame() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_hidden("#go")
        .with_frame_locked_after_probes(1);
    let evidence = MemoryEvidenceSink::new();

    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[Step::bare(StepKind::ClickSelector, "#go")])
        .await;

    assert_eq!(report.result, RunVerdict::Partial);
    assert_eq!(report.steps[0].status, StepStatus::Stuck);
    assert_eq!(report.steps[0].reason.as_deref(), Some("stuck_iframe_focus"));
    assert_eq!(report.ui_findings[0].what_failed, "stuck_iframe_focus");
    assert!(report.actions.is_empty());
    assert_eq!(
        evidence.names(),
        vec![
            "step_01_click_selector_before.png",
            "step_01_click_selector_retry1.png",
            "step_01_click_selector_stuck.png",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_teaching_timeout_without_human_click_is_partial() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new().with_hidden("text=Stop");
    let observer = ScriptedObserver::new();
    let evidence = MemoryEvidenceSink::new();
    let config = EngineConfig {
        teaching_enabled: true,
        learning_window: Duration::from_secs(3),
        ..config_in(&dir)
    };

    let report = engine(config, &driver, &evidence)
        .with_observer(Arc::new(observer.clone()))
        .run(&[Step::bare(StepKind::ClickText, "Stop")])
        .await;

    assert_eq!(report.result, RunVerdict::Partial);
    assert_eq!(report.steps[0].status, StepStatus::Timeout);
    assert!(report.console_errors[0].starts_with("Timeout on interactive step 1"));
    assert!(evidence
        .names()
        .contains(&"step_01_click_text_timeout.png".to_string()));
    assert_eq!(observer.incidents().len(), 1);

    let handoff = report.handoff.as_ref().unwrap();
    assert_eq!(handoff.reason, "interactive_timeout");
    assert!(!handoff.human_takeover);
    assert_eq!(handoff.learning_capture, "none");
}

fn slow_wait_then_click() -> [Step; 2] {
    [
        Step::bare(StepKind::WaitText, "Bienvenido"),
        Step::bare(StepKind::ClickSelector, "#go"),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_teaching_run_gone_stale_between_steps_hands_off() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_visible_after("text=Bienvenido", Duration::from_secs(12))
        .with_visible("#go");
    let observer = ScriptedObserver::new();
    let evidence = MemoryEvidenceSink::new();
    let config = EngineConfig {
        teaching_enabled: true,
        stuck_interactive_threshold: Duration::from_secs(10),
        learning_window: Duration::from_secs(3),
        ..config_in(&dir)
    };

    let report = engine(config, &driver, &evidence)
        .with_observer(Arc::new(observer.clone()))
        .run(&slow_wait_then_click())
        .await;

    assert_eq!(report.result, RunVerdict::Partial);
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps[0].status, StepStatus::Executed);
    assert_eq!(report.steps[1].status, StepStatus::Stuck);
    assert!(driver.clicks().is_empty());
    assert!(evidence
        .names()
        .contains(&"step_02_click_selector_stuck.png".to_string()));
    assert_eq!(report.handoff.as_ref().unwrap().where_, "1:click_selector:#go");
}

#[tokio::test(start_paused = true)]
async fn test_slow_wait_is_not_judged_between_steps_without_teaching() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_visible_after("text=Bienvenido", Duration::from_secs(12))
        .with_visible("#go");
    let evidence = MemoryEvidenceSink::new();
    let config = EngineConfig {
        stuck_interactive_threshold: Duration::from_secs(10),
        ..config_in(&dir)
    };

    let report = engine(config, &driver, &evidence)
        .run(&slow_wait_then_click())
        .await;

    assert_eq!(report.result, RunVerdict::Success);
    assert_eq!(driver.clicks(), vec!["#go"]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_bulk_clicks_each_get_their_own_timeout() {
    let dir = TempDir::new().unwrap();
    let driver = ScriptedDriver::new()
        .with_count(".queue .remove", 6, true)
        .with_click_delay(".queue .remove", Duration::from_secs(2));
    let evidence = MemoryEvidenceSink::new();

    let started = Instant::now();
    let report = engine(config_in(&dir), &driver, &evidence)
        .run(&[Step::bare(StepKind::BulkClickUntilEmpty, ".queue .remove")])
        .await;

    assert_eq!(report.result, RunVerdict::Success);
    assert_eq!(driver.clicks().len(), 6);
    // Twelve seconds of clicks fit in one attempt despite the 8s action timeout.
    assert_eq!(report.actions[0].attempts, 1);
    assert!(started.elapsed() >= Duration::from_secs(12));
}
