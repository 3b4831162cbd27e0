// Recording observer for event pipeline tests

use commutator_core::{DispatchReport, Message};
use commutator_events::FailureObserver;
use std::sync::{Arc, Mutex};

/// Failure observer that records a [`DispatchReport`] for every failed
/// event message it sees.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    reports: Arc<Mutex<Vec<DispatchReport>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of failures observed.
    pub fn failure_count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    /// Reports recorded so far.
    pub fn reports(&self) -> Vec<DispatchReport> {
        self.reports.lock().unwrap().clone()
    }

    /// Forget everything observed so far.
    pub fn clear(&self) {
        self.reports.lock().unwrap().clear();
    }
}

impl FailureObserver for RecordingObserver {
    fn on_failure(&self, message: &Message) {
        self.reports.lock().unwrap().push(message.report());
    }
}
