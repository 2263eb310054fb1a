//! pagepilot - interactive step execution for live web pages
//!
//! Drives a page through an ordered list of steps (click, fill, select,
//! wait) under strict time budgets, notices when it stops getting anywhere,
//! hands control to a human when stuck, and learns from the human's
//! correction so later runs against the same page do better.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`step`] - Step model and plan loading
//! - [`deadline`] - Run/step deadlines and effective timeouts
//! - [`learning`] - Durable selector learning and teaching audit records
//! - [`resolver`] - Fallback candidate generation
//! - [`watchdog`] - Stuck detection
//! - [`handoff`] - Human handoff state machine and run state
//! - [`engine`] - Execution loop, retry orchestrator, learning-capture window
//! - [`driver`] - Browser driver capability traits
//! - [`observer`] - Control-agent poll interface and progress events
//! - [`evidence`] - Screenshot evidence sinks
//! - [`report`] - Run report model and sinks
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Testing infrastructure (scripted driver, observer, sinks)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pagepilot::{Engine, EngineConfig, StepPlan};
//!
//! let config = EngineConfig::load(".pagepilot/config.toml".as_ref())?;
//! let plan = StepPlan::load("plan.json".as_ref())?;
//!
//! // `MyDriver` implements `BrowserDriver` over a real browser.
//! let engine = Engine::new(config, Arc::new(MyDriver::connect().await?));
//! let report = engine.run_plan(&plan).await?;
//! println!("{}", report.result);
//! ```

pub mod config;
pub mod deadline;
pub mod driver;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod handoff;
pub mod learning;
pub mod observer;
pub mod report;
pub mod resolver;
pub mod step;
pub mod testing;
pub mod watchdog;

// Re-export commonly used types
pub use error::{PilotError, Result};

// Re-export engine types
pub use config::{ConfigOverrides, EngineConfig, EventNoiseMode};
pub use engine::{CaptureOutcome, Engine, RetryOutcome};
pub use step::{Step, StepKind, StepPlan};

// Re-export capability traits
pub use driver::{BrowserDriver, DriverError, Locator, Query, SelectBy};
pub use evidence::{EvidenceSink, FsEvidenceSink};
pub use observer::{JsonFileObserver, NullObserver, ObservedEvent, ObserverChannel};
pub use report::{JsonFileReportSink, ReportSink, RunReport, RunVerdict};

// Re-export learning types
pub use handoff::{HandoffDecision, HandoffTrigger, RunState};
pub use learning::{state_key, target_key, LearningStore};
pub use watchdog::{StuckReason, WatchdogState};
