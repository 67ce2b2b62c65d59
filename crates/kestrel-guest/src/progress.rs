//! Progress reporting for guest actions
//!
//! Actions report coarse progress through a [`ProgressReporter`]; the
//! orchestrator forwards these updates to its event stream.

use serde::{Deserialize, Serialize};

/// Progress update from an action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    /// Action name
    pub action: String,

    /// Current progress percentage (0-100)
    pub percentage: u8,

    /// Human-readable status message
    pub message: String,

    /// Current step of multi-step actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Current step number (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_number: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_phases: Option<u32>,
}

impl Progress {
    pub fn new(action: impl Into<String>, percentage: u8, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            percentage: percentage.min(100),
            message: message.into(),
            phase: None,
            phase_number: None,
            total_phases: None,
        }
    }

    pub fn starting(action: impl Into<String>) -> Self {
        Self::new(action, 0, "Starting...")
    }

    pub fn completed(action: impl Into<String>) -> Self {
        Self::new(action, 100, "Completed")
    }

    /// Attach step information and derive the percentage from it
    pub fn with_phase(
        mut self,
        phase: impl Into<String>,
        phase_number: u32,
        total_phases: u32,
    ) -> Self {
        self.phase = Some(phase.into());
        self.phase_number = Some(phase_number);
        self.total_phases = Some(total_phases);
        if total_phases > 0 {
            let done = phase_number.saturating_sub(1).min(total_phases);
            self.percentage = (done * 100 / total_phases) as u8;
        }
        self
    }

    pub fn is_complete(&self) -> bool {
        self.percentage >= 100
    }
}

/// Trait for types that can send progress updates
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: Progress);
}

/// A reporter that drops every update
#[derive(Debug, Default, Clone)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _progress: Progress) {}
}

/// A progress reporter that collects all updates
#[derive(Debug, Default)]
pub struct CollectingReporter {
    updates: std::sync::Mutex<Vec<Progress>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<Progress> {
        self.updates.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Progress> {
        self.updates.lock().unwrap().last().cloned()
    }
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, progress: Progress) {
        self.updates.lock().unwrap().push(progress);
    }
}
