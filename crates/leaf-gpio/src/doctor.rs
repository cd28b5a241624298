use anyhow::Result;
use std::path::Path;

use crate::{ActuationConfig, GpioConfig};

pub fn check_thresholds(cfg: &ActuationConfig) -> Result<()> {
    anyhow::ensure!(cfg.low_threshold >= 0.0 && cfg.high_threshold <= 100.0, "actuation thresholds must lie in 0..100");
    anyhow::ensure!(cfg.low_threshold < cfg.high_threshold, "actuation.low_threshold must be below high_threshold");
    anyhow::ensure!(cfg.irrigate_ms >= 100 && cfg.irrigate_ms <= 60_000, "actuation.irrigate_ms should be 100..60000");
    Ok(())
}

pub fn check_gpio(cfg: &GpioConfig) -> Result<()> {
    match cfg.backend.as_str() {
        "simulated" => Ok(()),
        "sysfs" => {
            anyhow::ensure!(Path::new(&cfg.sysfs_root).is_dir(), "gpio.sysfs_root not a dir: {}", cfg.sysfs_root);
            anyhow::ensure!(cfg.alert_pin != Some(cfg.pin), "gpio.alert_pin must differ from gpio.pin");
            Ok(())
        }
        other => anyhow::bail!("unknown gpio.backend: {}", other),
    }
}
