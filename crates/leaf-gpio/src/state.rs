use leaf_proto::Action;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct ActuatorStatus {
    pub backend: String,
    pub last_action: Option<Action>,
    pub last_action_at: Option<Instant>,
    pub sprays: u64,
    pub alerts: u64,
    pub suppressed: u64,
    pub last_error: Option<String>,
}

impl ActuatorStatus {
    pub fn last_action_age(&self) -> Option<Duration> {
        self.last_action_at.map(|t| t.elapsed())
    }
}

/// Shared view of the dispatcher's counters. Readers never wait on a pulse
/// in progress.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle(Arc<Mutex<ActuatorStatus>>);

impl StatusHandle {
    pub fn new(status: ActuatorStatus) -> Self {
        Self(Arc::new(Mutex::new(status)))
    }

    pub fn snapshot(&self) -> ActuatorStatus {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut ActuatorStatus)) {
        f(&mut self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }
}
