pub mod detection;
pub mod journal;
pub mod region;

pub use detection::{Action, DetectionResult, LeafClass};
pub use journal::{EntrySource, JournalEntry};
pub use region::{BBox, Region, RegionOrigin};

/// Wall-clock timestamp used on every record that leaves the station.
pub fn unix_ms_now() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
