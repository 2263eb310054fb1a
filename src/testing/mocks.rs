//! Scripted implementations of the engine's collaborators.
//!
//! Every mock is a cheap `Clone` handle over shared state, so a test keeps
//! one clone to inspect what happened while the engine owns another.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::driver::{
    BrowserDriver, DriverError, DriverResult, Locator, Query, SelectBy, FRAME_FOCUS_PROBE_JS,
    FRAME_FOCUS_RELEASE_JS,
};
use crate::evidence::EvidenceSink;
use crate::observer::{Incident, ObservedEvent, ObserverChannel, ObserverSnapshot};
use crate::report::{ReportSink, RunReport};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =========================================================================
// Browser driver
// =========================================================================

/// How one scripted element behaves.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementScript {
    /// Invisible elements make every action wait out its timeout.
    pub visible: bool,
    /// Clicks fail as out-of-viewport until this many scroll nudges happened.
    pub needs_scrolls: u32,
    /// Matched element count reported by `count`.
    pub count: usize,
    /// Each click removes one match (for bulk-until-empty).
    pub consumed_on_click: bool,
    /// Every action fails with this error.
    pub error: Option<DriverError>,
    /// Each click takes this long to land.
    pub click_delay: Duration,
    /// The element only shows up once the clock reaches this instant.
    pub visible_from: Option<Instant>,
}

impl Default for ElementScript {
    fn default() -> Self {
        Self {
            visible: true,
            needs_scrolls: 0,
            count: 1,
            consumed_on_click: false,
            error: None,
            click_delay: Duration::ZERO,
            visible_from: None,
        }
    }
}

#[derive(Debug)]
struct DriverState {
    elements: HashMap<String, ElementScript>,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    selects: Vec<(String, SelectBy)>,
    navigations: Vec<String>,
    url: String,
    title: String,
    closed: bool,
    close_after_clicks: Option<usize>,
    frame_locked: bool,
    frame_releasable: bool,
    frame_probes: u32,
    frame_lock_after_probes: Option<u32>,
    page_info_stall: Option<Duration>,
}

/// Browser driver whose page is a map from query descriptions to scripted
/// elements. Unknown queries behave like elements that never appear.
///
/// # Example
///
/// ```rust,ignore
/// let driver = ScriptedDriver::new()
///     .with_visible("#go")
///     .with_clickable_after_scrolls("#late", 2);
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    state: Arc<Mutex<DriverState>>,
    scrolls: Arc<AtomicU32>,
    screenshots: Arc<AtomicU32>,
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDriver {
    /// Empty page at `https://player.example.com/room` titled "Now Playing".
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DriverState {
                elements: HashMap::new(),
                clicks: Vec::new(),
                fills: Vec::new(),
                selects: Vec::new(),
                navigations: Vec::new(),
                url: "https://player.example.com/room".to_string(),
                title: "Now Playing".to_string(),
                closed: false,
                close_after_clicks: None,
                frame_locked: false,
                frame_releasable: true,
                frame_probes: 0,
                frame_lock_after_probes: None,
                page_info_stall: None,
            })),
            scrolls: Arc::new(AtomicU32::new(0)),
            screenshots: Arc::new(AtomicU32::new(0)),
        }
    }

    #[must_use]
    pub fn with_url(self, url: &str) -> Self {
        guard(&self.state).url = url.to_string();
        self
    }

    #[must_use]
    pub fn with_title(self, title: &str) -> Self {
        guard(&self.state).title = title.to_string();
        self
    }

    /// Script an element under its query description (`#id`, `text=Stop`,
    /// `.card >> text=Add`).
    #[must_use]
    pub fn with_element(self, key: &str, script: ElementScript) -> Self {
        guard(&self.state).elements.insert(key.to_string(), script);
        self
    }

    #[must_use]
    pub fn with_visible(self, key: &str) -> Self {
        self.with_element(key, ElementScript::default())
    }

    /// Present but invisible: actions wait out their timeout.
    #[must_use]
    pub fn with_hidden(self, key: &str) -> Self {
        self.with_element(
            key,
            ElementScript {
                visible: false,
                ..ElementScript::default()
            },
        )
    }

    #[must_use]
    pub fn with_clickable_after_scrolls(self, key: &str, scrolls: u32) -> Self {
        self.with_element(
            key,
            ElementScript {
                needs_scrolls: scrolls,
                ..ElementScript::default()
            },
        )
    }

    #[must_use]
    pub fn with_count(self, key: &str, count: usize, consumed_on_click: bool) -> Self {
        self.with_element(
            key,
            ElementScript {
                count,
                consumed_on_click,
                ..ElementScript::default()
            },
        )
    }

    #[must_use]
    pub fn with_error(self, key: &str, error: DriverError) -> Self {
        self.with_element(
            key,
            ElementScript {
                error: Some(error),
                ..ElementScript::default()
            },
        )
    }

    /// Trap focus in a nested frame; `releasable` decides whether the
    /// release script frees it.
    #[must_use]
    pub fn with_frame_locked(self, releasable: bool) -> Self {
        {
            let mut state = guard(&self.state);
            state.frame_locked = true;
            state.frame_releasable = releasable;
        }
        self
    }

    /// `key` shows up `after` from now. The rest of its script is kept.
    #[must_use]
    pub fn with_visible_after(self, key: &str, after: Duration) -> Self {
        let from = Instant::now() + after;
        guard(&self.state)
            .elements
            .entry(key.to_string())
            .or_default()
            .visible_from = Some(from);
        self
    }

    /// Every click on `key` takes `delay`.
    #[must_use]
    pub fn with_click_delay(self, key: &str, delay: Duration) -> Self {
        guard(&self.state)
            .elements
            .entry(key.to_string())
            .or_default()
            .click_delay = delay;
        self
    }

    /// Focus is free for the first `probes` focus probes and trapped, with
    /// no way out, from then on.
    #[must_use]
    pub fn with_frame_locked_after_probes(self, probes: u32) -> Self {
        {
            let mut state = guard(&self.state);
            state.frame_lock_after_probes = Some(probes);
            state.frame_releasable = false;
        }
        self
    }

    /// `current_url` and `current_title` take `stall` to answer.
    #[must_use]
    pub fn with_stalled_page_info(self, stall: Duration) -> Self {
        guard(&self.state).page_info_stall = Some(stall);
        self
    }

    /// Close the page once this many clicks have landed.
    #[must_use]
    pub fn with_close_after_clicks(self, clicks: usize) -> Self {
        guard(&self.state).close_after_clicks = Some(clicks);
        self
    }

    /// Close the page now.
    pub fn close(&self) {
        guard(&self.state).closed = true;
    }

    #[must_use]
    pub fn clicks(&self) -> Vec<String> {
        guard(&self.state).clicks.clone()
    }

    #[must_use]
    pub fn fills(&self) -> Vec<(String, String)> {
        guard(&self.state).fills.clone()
    }

    #[must_use]
    pub fn selects(&self) -> Vec<(String, SelectBy)> {
        guard(&self.state).selects.clone()
    }

    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        guard(&self.state).navigations.clone()
    }

    #[must_use]
    pub fn scroll_count(&self) -> u32 {
        self.scrolls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn screenshot_count(&self) -> u32 {
        self.screenshots.load(Ordering::SeqCst)
    }

    async fn stall_page_info(&self) {
        let stall = guard(&self.state).page_info_stall;
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
    }

    fn closed_error() -> DriverError {
        DriverError::Closed {
            detail: "target page, context or browser has been closed".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Readiness {
    Ready,
    Fail(DriverError),
    NeverAppears,
    AppearsIn(Duration),
}

/// Locator over a [`ScriptedDriver`] page.
#[derive(Debug, Clone)]
pub struct ScriptedLocator {
    key: String,
    driver: ScriptedDriver,
}

impl ScriptedLocator {
    fn readiness(&self, needs_viewport: bool) -> Readiness {
        let state = guard(&self.driver.state);
        if state.closed {
            return Readiness::Fail(ScriptedDriver::closed_error());
        }
        let Some(element) = state.elements.get(&self.key) else {
            return Readiness::NeverAppears;
        };
        if let Some(error) = &element.error {
            return Readiness::Fail(error.clone());
        }
        if !element.visible || element.count == 0 {
            return Readiness::NeverAppears;
        }
        if let Some(from) = element.visible_from {
            let wait = from.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                return Readiness::AppearsIn(wait);
            }
        }
        if needs_viewport && self.driver.scroll_count() < element.needs_scrolls {
            return Readiness::Fail(DriverError::Unavailable {
                target: self.key.clone(),
                detail: "element is outside of the viewport".to_string(),
            });
        }
        Readiness::Ready
    }

    async fn ready(&self, needs_viewport: bool, timeout: Duration) -> DriverResult<()> {
        match self.readiness(needs_viewport) {
            Readiness::Ready => Ok(()),
            Readiness::Fail(error) => Err(error),
            Readiness::AppearsIn(wait) if wait <= timeout => {
                tokio::time::sleep(wait).await;
                Ok(())
            }
            Readiness::NeverAppears | Readiness::AppearsIn(_) => {
                tokio::time::sleep(timeout).await;
                Err(DriverError::timeout(
                    format!("waiting for {} to be visible", self.key),
                    timeout,
                ))
            }
        }
    }

    fn click_delay(&self) -> Duration {
        guard(&self.driver.state)
            .elements
            .get(&self.key)
            .map_or(Duration::ZERO, |element| element.click_delay)
    }
}

#[async_trait]
impl Locator for ScriptedLocator {
    async fn click(&self, timeout: Duration) -> DriverResult<()> {
        self.ready(true, timeout).await?;
        let delay = self.click_delay();
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(DriverError::timeout(
                format!("click on {} did not land", self.key),
                timeout,
            ));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = guard(&self.driver.state);
        state.clicks.push(self.key.clone());
        if let Some(element) = state.elements.get_mut(&self.key) {
            if element.consumed_on_click {
                element.count = element.count.saturating_sub(1);
            }
        }
        if state
            .close_after_clicks
            .is_some_and(|limit| state.clicks.len() >= limit)
        {
            state.closed = true;
        }
        Ok(())
    }

    async fn fill(&self, value: &str, timeout: Duration) -> DriverResult<()> {
        self.ready(true, timeout).await?;
        guard(&self.driver.state)
            .fills
            .push((self.key.clone(), value.to_string()));
        Ok(())
    }

    async fn select_option(&self, option: &SelectBy, timeout: Duration) -> DriverResult<()> {
        self.ready(true, timeout).await?;
        guard(&self.driver.state)
            .selects
            .push((self.key.clone(), option.clone()));
        Ok(())
    }

    async fn wait_visible(&self, timeout: Duration) -> DriverResult<()> {
        self.ready(false, timeout).await
    }

    async fn count(&self, _timeout: Duration) -> DriverResult<usize> {
        let state = guard(&self.driver.state);
        if state.closed {
            return Err(ScriptedDriver::closed_error());
        }
        Ok(state
            .elements
            .get(&self.key)
            .filter(|element| element.visible && element.error.is_none())
            .filter(|element| {
                element
                    .visible_from
                    .is_none_or(|from| from <= Instant::now())
            })
            .map_or(0, |element| element.count))
    }

    fn nth(&self, _index: usize) -> Box<dyn Locator> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn navigate(&self, url: &str, _timeout: Duration) -> DriverResult<()> {
        let mut state = guard(&self.state);
        if state.closed {
            return Err(Self::closed_error());
        }
        state.navigations.push(url.to_string());
        state.url = url.to_string();
        Ok(())
    }

    fn locate(&self, query: &Query) -> Box<dyn Locator> {
        Box::new(ScriptedLocator {
            key: query.describe(),
            driver: self.clone(),
        })
    }

    async fn screenshot(&self, _timeout: Duration) -> DriverResult<Vec<u8>> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(b"\x89PNG scripted".to_vec())
    }

    async fn evaluate(&self, script: &str, _timeout: Duration) -> DriverResult<Value> {
        let mut state = guard(&self.state);
        if state.closed {
            return Err(Self::closed_error());
        }
        if script == FRAME_FOCUS_PROBE_JS {
            state.frame_probes += 1;
            if state
                .frame_lock_after_probes
                .is_some_and(|free| state.frame_probes > free)
            {
                state.frame_locked = true;
            }
            return Ok(Value::Bool(state.frame_locked));
        }
        if script == FRAME_FOCUS_RELEASE_JS {
            if state.frame_releasable {
                state.frame_locked = false;
            }
            return Ok(Value::Bool(!state.frame_locked));
        }
        Ok(Value::Null)
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.stall_page_info().await;
        Ok(guard(&self.state).url.clone())
    }

    async fn current_title(&self) -> DriverResult<String> {
        self.stall_page_info().await;
        Ok(guard(&self.state).title.clone())
    }

    fn is_closed(&self) -> bool {
        guard(&self.state).closed
    }

    async fn scroll_by(&self, _dx: i64, _dy: i64, _timeout: Duration) -> DriverResult<()> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        self.scrolls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =========================================================================
// Observer channel
// =========================================================================

#[derive(Debug, Default)]
struct ObserverState {
    events: Vec<ObservedEvent>,
    after_incident: Vec<ObservedEvent>,
    incidents: Vec<Incident>,
    fail: bool,
}

/// Observer whose events are scripted up front. Events queued with
/// [`ScriptedObserver::with_event_after_incident`] only show up once the
/// engine has reported a handoff, the way a human reacts to one.
#[derive(Debug, Clone, Default)]
pub struct ScriptedObserver {
    state: Arc<Mutex<ObserverState>>,
    polls: Arc<AtomicU32>,
}

impl ScriptedObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_event(self, event: ObservedEvent) -> Self {
        guard(&self.state).events.push(event);
        self
    }

    #[must_use]
    pub fn with_event_after_incident(self, event: ObservedEvent) -> Self {
        guard(&self.state).after_incident.push(event);
        self
    }

    /// Every poll fails.
    #[must_use]
    pub fn failing(self) -> Self {
        guard(&self.state).fail = true;
        self
    }

    /// Add an event visible from the next poll on.
    pub fn push_event(&self, event: ObservedEvent) {
        guard(&self.state).events.push(event);
    }

    #[must_use]
    pub fn incidents(&self) -> Vec<Incident> {
        guard(&self.state).incidents.clone()
    }

    #[must_use]
    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObserverChannel for ScriptedObserver {
    async fn poll_state(&self) -> anyhow::Result<ObserverSnapshot> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let state = guard(&self.state);
        if state.fail {
            bail!("control agent unreachable");
        }
        Ok(ObserverSnapshot {
            recent_events: state.events.clone(),
            agent_online: true,
            incident_open: !state.incidents.is_empty(),
        })
    }

    async fn report_incident(&self, incident: &Incident) -> anyhow::Result<()> {
        let mut state = guard(&self.state);
        state.incidents.push(incident.clone());
        let revealed = std::mem::take(&mut state.after_incident);
        state.events.extend(revealed);
        Ok(())
    }
}

// =========================================================================
// Sinks
// =========================================================================

/// Evidence sink that keeps artifact names in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryEvidenceSink {
    names: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl MemoryEvidenceSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        guard(&self.names).clone()
    }
}

impl EvidenceSink for MemoryEvidenceSink {
    fn write(&self, name: &str, _bytes: &[u8]) -> anyhow::Result<PathBuf> {
        if self.fail {
            bail!("evidence disk full");
        }
        guard(&self.names).push(name.to_string());
        Ok(PathBuf::from("memory").join(name))
    }
}

/// Report sink that keeps every persisted report.
#[derive(Debug, Clone, Default)]
pub struct MemoryReportSink {
    reports: Arc<Mutex<Vec<RunReport>>>,
}

impl MemoryReportSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reports(&self) -> Vec<RunReport> {
        guard(&self.reports).clone()
    }
}

impl ReportSink for MemoryReportSink {
    fn persist(&self, report: &RunReport) -> anyhow::Result<()> {
        guard(&self.reports).push(report.clone());
        Ok(())
    }
}
