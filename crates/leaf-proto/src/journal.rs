use serde::{Deserialize, Serialize};

use crate::detection::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Capture,
    Manual,
    Automatic,
    /// Image posted to the upload endpoint; never actuates.
    Upload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ts_unix_ms: i64,
    pub source: EntrySource,
    pub region_id: Option<u64>,
    pub disease: Option<String>,
    pub severity: Option<f32>,
    pub action: Action,
    pub duration_ms: u64,
    // Spray decided but held back by the rate limiter
    pub suppressed: bool,
    pub image_path: Option<String>,
    pub error: Option<String>,
}
