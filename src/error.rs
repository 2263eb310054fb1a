//! Custom error types for pagepilot.
//!
//! This module provides the failure taxonomy the execution engine reasons
//! about: which failures are retried locally, which escalate to a human
//! handoff, and which end the run immediately.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::driver::DriverError;

/// Main error type for pagepilot operations
#[derive(Error, Debug)]
pub enum PilotError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Step plan could not be parsed
    #[error("Invalid step plan: {message}")]
    Plan { message: String },

    // =========================================================================
    // Action Errors
    // =========================================================================
    /// An action exceeded its effective budget
    #[error("Timeout after {}ms: {detail}", .after.as_millis())]
    Timeout { detail: String, after: Duration },

    /// Target located but not visible, enabled, or clickable
    #[error("Target unavailable: {target} ({detail})")]
    TargetUnavailable { target: String, detail: String },

    /// No candidate matched after retries
    #[error("Target not found: {target}")]
    TargetNotFound { target: String },

    /// Input focus is trapped inside a nested frame
    #[error("Focus trapped in nested frame: {detail}")]
    FocusTrapped { detail: String },

    // =========================================================================
    // Run Errors
    // =========================================================================
    /// The page or browser disappeared mid-run
    #[error("Browser runtime closed: {detail}")]
    RuntimeClosed { detail: String },

    /// Run- or step-level ceiling reached before an action could start
    #[error("{scope} deadline exceeded before action could start")]
    DeadlineExceeded { scope: String },

    /// Generic driver failure that fits no other class
    #[error("Driver error: {message}")]
    Driver { message: String },

    /// Learning store or evidence persistence failed
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PilotError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(detail: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            detail: detail.into(),
            after,
        }
    }

    /// Create a target-not-found error
    pub fn not_found(target: impl Into<String>) -> Self {
        Self::TargetNotFound {
            target: target.into(),
        }
    }

    /// Create a runtime-closed error
    pub fn closed(detail: impl Into<String>) -> Self {
        Self::RuntimeClosed {
            detail: detail.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error can be recovered locally by retrying or by
    /// falling back to another candidate
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::TargetUnavailable { .. }
                | Self::TargetNotFound { .. }
                | Self::FocusTrapped { .. }
                | Self::Driver { .. }
        )
    }

    /// Check if this error is a timeout-kind failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::DeadlineExceeded { .. })
    }

    /// Check if this error should be escalated to a human once local
    /// recovery is exhausted
    pub fn requires_human(&self) -> bool {
        matches!(
            self,
            Self::TargetNotFound { .. }
                | Self::TargetUnavailable { .. }
                | Self::FocusTrapped { .. }
        )
    }

    /// Check if this error is fatal (ends the run, never retried)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RuntimeClosed { .. }
                | Self::DeadlineExceeded { .. }
                | Self::Config { .. }
                | Self::InvalidConfig { .. }
                | Self::Plan { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RuntimeClosed { .. } => 2,
            Self::DeadlineExceeded { .. } | Self::Timeout { .. } => 3,
            Self::TargetNotFound { .. } | Self::TargetUnavailable { .. } => 4,
            Self::FocusTrapped { .. } => 5,
            Self::Plan { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

impl From<DriverError> for PilotError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Timeout { detail, after } => Self::Timeout { detail, after },
            DriverError::NotFound { target } => Self::TargetNotFound { target },
            DriverError::Unavailable { target, detail } => {
                Self::TargetUnavailable { target, detail }
            }
            DriverError::Closed { detail } => Self::RuntimeClosed { detail },
            DriverError::Other { message } => Self::Driver { message },
        }
    }
}

/// Type alias for pagepilot results
pub type Result<T> = std::result::Result<T, PilotError>;
