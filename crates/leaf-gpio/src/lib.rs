pub mod actuator;
pub mod decider;
pub mod doctor;
pub mod safety;
pub mod state;

use serde::Deserialize;

pub use actuator::{actuator_from_config, Actuator, ActuationDispatcher, DispatchOutcome, SimulatedActuator, SysfsGpio};
pub use decider::{ActuationDecider, Decision};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    /// Severity (0..100) from which a diseased leaf raises an alert.
    pub low_threshold: f32,
    /// Severity (0..100) from which the sprinkler runs.
    pub high_threshold: f32,
    pub irrigate_ms: u64,
    /// Hard safety: minimum spacing between two sprinkler runs.
    pub min_spray_interval_s: u64,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self { low_threshold: 30.0, high_threshold: 70.0, irrigate_ms: 3000, min_spray_interval_s: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub backend: String, // "simulated" | "sysfs"
    /// BCM line driving the sprinkler relay.
    pub pin: u32,
    /// Optional indicator line pulsed on alerts.
    pub alert_pin: Option<u32>,
    pub alert_ms: u64,
    pub sysfs_root: String,
    pub active_low: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: "simulated".into(),
            pin: 17,
            alert_pin: None,
            alert_ms: 500,
            sysfs_root: "/sys/class/gpio".into(),
            active_low: false,
        }
    }
}
