use anyhow::Result;

use crate::{ManualConfig, SchedulerConfig, REFERENCE_FRAME};

pub fn check_scheduler(cfg: &SchedulerConfig) -> Result<()> {
    anyhow::ensure!(cfg.interval_ms >= 250 && cfg.interval_ms <= 600_000, "scheduler.interval_ms should be 250..600000");
    Ok(())
}

pub fn check_manual(cfg: &ManualConfig) -> Result<()> {
    let (w, h) = REFERENCE_FRAME;
    anyhow::ensure!(cfg.region_size >= 2 && cfg.region_size <= w.min(h), "manual.region_size out of range");
    anyhow::ensure!(cfg.min_region_side <= cfg.region_size, "manual.min_region_side larger than region_size");
    anyhow::ensure!(cfg.click_cooldown_ms <= 60_000, "manual.click_cooldown_ms too long");
    Ok(())
}
