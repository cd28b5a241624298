use anyhow::{Context, Result};
use async_trait::async_trait;
use leaf_proto::Action;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::decider::Decision;
use crate::safety::SprayRateLimit;
use crate::state::{ActuatorStatus, StatusHandle};
use crate::GpioConfig;

#[async_trait]
pub trait Actuator: Send {
    fn name(&self) -> &'static str;
    async fn irrigate(&mut self, duration: Duration) -> Result<()>;
    async fn alert(&mut self) -> Result<()>;
}

pub fn actuator_from_config(cfg: &GpioConfig) -> Result<Box<dyn Actuator>> {
    match cfg.backend.as_str() {
        "simulated" => Ok(Box::new(SimulatedActuator::default())),
        "sysfs" => Ok(Box::new(SysfsGpio::new(cfg.clone()))),
        other => anyhow::bail!("unknown gpio.backend: {}", other),
    }
}

/// Logs what real hardware would do. Used off-Pi and in tests.
#[derive(Debug, Default)]
pub struct SimulatedActuator {
    pub sprays: u64,
    pub alerts: u64,
}

#[async_trait]
impl Actuator for SimulatedActuator {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn irrigate(&mut self, duration: Duration) -> Result<()> {
        self.sprays += 1;
        info!("gpio(sim): spray for {}ms", duration.as_millis());
        Ok(())
    }

    async fn alert(&mut self) -> Result<()> {
        self.alerts += 1;
        info!("gpio(sim): alert");
        Ok(())
    }
}

/// Drives relay lines through the legacy sysfs GPIO interface.
pub struct SysfsGpio {
    cfg: GpioConfig,
}

impl SysfsGpio {
    pub fn new(cfg: GpioConfig) -> Self {
        Self { cfg }
    }

    fn line_dir(&self, pin: u32) -> PathBuf {
        PathBuf::from(&self.cfg.sysfs_root).join(format!("gpio{}", pin))
    }

    async fn ensure_output(&self, pin: u32) -> Result<()> {
        let dir = self.line_dir(pin);
        if !dir.exists() {
            let export = PathBuf::from(&self.cfg.sysfs_root).join("export");
            fs::write(&export, pin.to_string())
                .await
                .with_context(|| format!("export gpio{}", pin))?;
        }
        anyhow::ensure!(dir.exists(), "gpio{} not present after export", pin);
        fs::write(dir.join("direction"), "out")
            .await
            .with_context(|| format!("set gpio{} direction", pin))?;
        Ok(())
    }

    fn level(&self, on: bool) -> &'static str {
        if on != self.cfg.active_low {
            "1"
        } else {
            "0"
        }
    }

    async fn pulse(&self, pin: u32, duration: Duration) -> Result<()> {
        self.ensure_output(pin).await?;
        let line = RaisedLine::raise(self.line_dir(pin).join("value"), self.level(true), self.level(false))
            .with_context(|| format!("write gpio{} value", pin))?;
        debug!("gpio: line {} on for {}ms", pin, duration.as_millis());
        tokio::time::sleep(duration).await;
        line.lower().with_context(|| format!("write gpio{} value", pin))
    }
}

/// A line held at its active level. Dropping it, including when the pulse
/// future is cancelled mid-sleep, writes the idle level back.
///
/// Value writes are synchronous: a sysfs value file never blocks, and an
/// in-flight async write could land after the drop and re-raise the line.
struct RaisedLine {
    value: PathBuf,
    idle: &'static str,
    armed: bool,
}

impl RaisedLine {
    fn raise(value: PathBuf, active: &'static str, idle: &'static str) -> std::io::Result<Self> {
        let line = Self { value, idle, armed: true };
        std::fs::write(&line.value, active)?;
        Ok(line)
    }

    fn lower(mut self) -> std::io::Result<()> {
        self.armed = false;
        std::fs::write(&self.value, self.idle)
    }
}

impl Drop for RaisedLine {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("gpio: pulse on {} cut short, forcing line idle", self.value.display());
        if let Err(e) = std::fs::write(&self.value, self.idle) {
            warn!("gpio: failed to idle {}: {}", self.value.display(), e);
        }
    }
}

#[async_trait]
impl Actuator for SysfsGpio {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    async fn irrigate(&mut self, duration: Duration) -> Result<()> {
        self.pulse(self.cfg.pin, duration).await
    }

    async fn alert(&mut self) -> Result<()> {
        match self.cfg.alert_pin {
            Some(pin) => self.pulse(pin, Duration::from_millis(self.cfg.alert_ms)).await,
            None => {
                warn!("gpio: alert raised (no alert_pin configured)");
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub action: Action,
    pub duration_ms: u64,
    pub suppressed: bool,
    pub error: Option<String>,
}

/// Owns the actuator and applies the spray rate limit before touching it.
pub struct ActuationDispatcher {
    actuator: Box<dyn Actuator>,
    limiter: SprayRateLimit,
    status: StatusHandle,
}

impl ActuationDispatcher {
    pub fn new(actuator: Box<dyn Actuator>, min_spray_interval: Duration) -> Self {
        let status = StatusHandle::new(ActuatorStatus { backend: actuator.name().to_string(), ..ActuatorStatus::default() });
        Self { actuator, limiter: SprayRateLimit::new(min_spray_interval), status }
    }

    pub fn status(&self) -> ActuatorStatus {
        self.status.snapshot()
    }

    /// Handle that stays readable while `dispatch` holds the actuator.
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub async fn dispatch(&mut self, decision: Decision) -> DispatchOutcome {
        let mut out = DispatchOutcome {
            action: decision.action,
            duration_ms: decision.duration_ms,
            suppressed: false,
            error: None,
        };

        let res = match decision.action {
            Action::None => return out,
            Action::Irrigate => {
                if !self.limiter.allow_spray() {
                    info!("actuation: spray suppressed by min_spray_interval");
                    self.status.update(|st| st.suppressed += 1);
                    out.suppressed = true;
                    out.duration_ms = 0;
                    return out;
                }
                self.status.update(|st| st.sprays += 1);
                self.actuator.irrigate(Duration::from_millis(decision.duration_ms)).await
            }
            Action::Alert => {
                self.status.update(|st| st.alerts += 1);
                self.actuator.alert().await
            }
        };

        let error = res.err().map(|e| {
            warn!("actuation: {} failed: {:#}", decision.action.as_str(), e);
            format!("{:#}", e)
        });
        self.status.update(|st| {
            st.last_action = Some(decision.action);
            st.last_action_at = Some(Instant::now());
            if error.is_some() {
                st.last_error = error.clone();
            }
        });
        out.error = error;
        out
    }
}
