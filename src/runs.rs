//! Run state lookup.
//!
//! Job execution lives outside this crate. The core only asks whether a run
//! id refers to a run that is executing right now.

use dashmap::DashMap;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Scheduled but not yet started.
    Pending,
    /// Started and not yet finished.
    Executing,
    /// Completed, successfully or not.
    Finished,
}

/// Answers run state queries for build-scope token validation.
pub trait RunTracker: Send + Sync {
    /// Current state of `run_id`, or `None` if the run is unknown.
    fn run_state(&self, run_id: &str) -> Option<RunState>;
}

/// In-memory run tracker.
#[derive(Default)]
pub struct RunRegistry {
    runs: DashMap<String, RunState>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a run that has not started yet.
    pub fn schedule(&self, run_id: &str) {
        self.runs.insert(run_id.to_string(), RunState::Pending);
    }

    /// Mark `run_id` as executing.
    pub fn begin(&self, run_id: &str) {
        self.runs.insert(run_id.to_string(), RunState::Executing);
    }

    /// Mark `run_id` as finished.
    pub fn finish(&self, run_id: &str) {
        self.runs.insert(run_id.to_string(), RunState::Finished);
    }

    /// Forget `run_id` entirely.
    pub fn remove(&self, run_id: &str) -> Option<RunState> {
        self.runs.remove(run_id).map(|(_, state)| state)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl RunTracker for RunRegistry {
    fn run_state(&self, run_id: &str) -> Option<RunState> {
        self.runs.get(run_id).map(|state| *state)
    }
}
