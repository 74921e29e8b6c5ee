//! Step vocabulary and the progress projection
//!
//! Progress is a pure function of the current step. The table below is part
//! of the external contract: dashboards and pollers key off these exact
//! values, so it must not drift.

use serde::{Deserialize, Serialize};

/// Named phase of the session pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Initializing,
    SetupDriver,
    DataLeakCheck,
    OpeningUrl,
    Scrolling,
    ClickingPost,
    SkippingAds,
    ReturningHome,
    ClearingCache,
    Completed,
    /// Emitted when returning from a clicked-through page.
    Navigation,
    /// Top-level pipeline fault.
    Error,
    /// Written by an explicit stop request.
    Stopped,
    #[serde(other)]
    Unknown,
}

impl Step {
    /// Coarse progress percentage for this step. Steps outside the fixed
    /// table report 0.
    pub fn progress(&self) -> u8 {
        match self {
            Step::Initializing => 10,
            Step::SetupDriver => 20,
            Step::DataLeakCheck => 30,
            Step::OpeningUrl => 40,
            Step::Scrolling => 50,
            Step::ClickingPost => 60,
            Step::SkippingAds => 70,
            Step::ReturningHome => 80,
            Step::ClearingCache => 90,
            Step::Completed => 100,
            _ => 0,
        }
    }
}

/// Outcome tag attached to every log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Running,
    Success,
    Error,
    Skipped,
    Warning,
    Info,
    Failed,
}

/// Lifecycle status of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl SessionStatus {
    /// Terminal sessions are read-only historical records.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Failed)
    }
}

/// Per-phase outcome used by the pipeline driver to decide whether to
/// continue or jump straight to cleanup.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    Ok,
    /// Logged, but the pipeline keeps going.
    NonFatal(String),
    /// Remaining interaction steps are abandoned; cleanup still runs.
    Fatal(String),
}
