//! Testing infrastructure for pagepilot.
//!
//! Scripted stand-ins for every capability the engine consumes, so runs can
//! be driven end to end without a browser or a control agent. Pair them
//! with `#[tokio::test(start_paused = true)]`: all engine timing goes
//! through tokio's clock, so timeouts elapse instantly and deterministically.
//!
//! # Example
//!
//! ```rust,ignore
//! use pagepilot::testing::{ScriptedDriver, ScriptedObserver};
//! use pagepilot::observer::ObservedEvent;
//!
//! let driver = ScriptedDriver::new().with_hidden("text=Stop");
//! let observer = ScriptedObserver::new()
//!     .with_event_after_incident(ObservedEvent::click("#transport-stop", "Stop"));
//! ```

pub mod mocks;

pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{BrowserDriver, DriverError, Query};
    use crate::observer::{Incident, ObservedEvent, ObserverChannel};
    use crate::report::Finding;
    use std::time::Duration;

    const T: Duration = Duration::from_secs(2);

    // =========================================================================
    // Scripted driver
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_visible_element_clicks_immediately() {
        let driver = ScriptedDriver::new().with_visible("#go");
        let start = tokio::time::Instant::now();
        driver.locate(&Query::Selector("#go".into())).click(T).await.unwrap();
        assert_eq!(driver.clicks(), vec!["#go"]);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_element_waits_out_timeout() {
        let driver = ScriptedDriver::new();
        let start = tokio::time::Instant::now();
        let err = driver
            .locate(&Query::Text("Stop".into()))
            .click(T)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Timeout { .. }));
        assert_eq!(start.elapsed(), T);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clickable_after_scrolls() {
        let driver = ScriptedDriver::new().with_clickable_after_scrolls("#late", 1);
        let locator = driver.locate(&Query::Selector("#late".into()));
        assert!(matches!(
            locator.click(T).await,
            Err(DriverError::Unavailable { .. })
        ));
        driver.scroll_by(0, 600, T).await.unwrap();
        assert!(locator.click(T).await.is_ok());
        assert_eq!(driver.scroll_count(), 1);
    }

    #[tokio::test]
    async fn test_consumed_count_and_close_after_clicks() {
        let driver = ScriptedDriver::new()
            .with_count(".row", 2, true)
            .with_close_after_clicks(2);
        let rows = driver.locate(&Query::Selector(".row".into()));
        rows.nth(0).click(T).await.unwrap();
        assert_eq!(rows.count(T).await.unwrap(), 1);
        rows.nth(0).click(T).await.unwrap();
        assert!(driver.is_closed());
        assert!(matches!(rows.count(T).await, Err(DriverError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_frame_focus_release() {
        let stuck = ScriptedDriver::new().with_frame_locked(false);
        assert!(stuck.frame_focus_locked(T).await.unwrap());
        assert!(!stuck.release_frame_focus(T).await.unwrap());

        let freed = ScriptedDriver::new().with_frame_locked(true);
        assert!(freed.release_frame_focus(T).await.unwrap());
        assert!(!freed.frame_focus_locked(T).await.unwrap());
    }

    // =========================================================================
    // Scripted observer and sinks
    // =========================================================================

    #[tokio::test]
    async fn test_observer_reveals_events_after_incident() {
        let observer = ScriptedObserver::new()
            .with_event_after_incident(ObservedEvent::click("#transport-stop", "Stop"));
        assert!(observer.poll_state().await.unwrap().recent_events.is_empty());

        observer
            .report_incident(&Incident {
                reason: "stuck".into(),
                where_: "0:click_text:Stop".into(),
                url: String::new(),
                finding: Finding::neutral(),
                teaching: true,
            })
            .await
            .unwrap();
        let snapshot = observer.poll_state().await.unwrap();
        assert_eq!(snapshot.recent_events.len(), 1);
        assert!(snapshot.incident_open);
        assert_eq!(observer.poll_count(), 2);
    }

    #[test]
    fn test_memory_sinks() {
        use crate::evidence::EvidenceSink;

        let sink = MemoryEvidenceSink::new();
        sink.write("step_01_click_selector_before.png", b"png").unwrap();
        assert_eq!(sink.names(), vec!["step_01_click_selector_before.png"]);
        assert!(MemoryEvidenceSink::failing().write("x.png", b"").is_err());
    }
}
