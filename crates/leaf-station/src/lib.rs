pub mod analyzer;
pub mod doctor;
pub mod error;
pub mod mode;
pub mod regions;
pub mod scheduler;
pub mod service;
pub mod session;

use serde::Deserialize;

pub use analyzer::Analyzer;
pub use error::StationError;
pub use mode::{ModeController, ModeState};
pub use regions::RegionStore;
pub use scheduler::SchedulerHandle;
pub use service::{ServiceStatus, SourceFactory, StartOutcome, UploadResult, VideoService};
pub use session::{AutoBatch, Session};

/// Width/height of the coordinate space clicks arrive in.
pub const REFERENCE_FRAME: (u32, u32) = (640, 480);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_ms: 3000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManualConfig {
    /// Side of the square cut around a click.
    pub region_size: u32,
    /// Smallest side a clipped click region may keep.
    pub min_region_side: u32,
    pub click_cooldown_ms: u64,
}

impl Default for ManualConfig {
    fn default() -> Self {
        Self { region_size: 150, min_region_side: 100, click_cooldown_ms: 1000 }
    }
}
