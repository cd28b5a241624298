use leaf_proto::{Action, DetectionResult};

use crate::ActuationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub duration_ms: u64,
}

/// Pure severity-to-action policy. Never touches hardware.
#[derive(Debug, Clone)]
pub struct ActuationDecider {
    cfg: ActuationConfig,
}

impl ActuationDecider {
    pub fn new(cfg: ActuationConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ActuationConfig {
        &self.cfg
    }

    pub fn decide(&self, result: &DetectionResult) -> Action {
        if result.is_error() || !result.has_disease() {
            return Action::None;
        }
        let severity = result.severity.unwrap_or(0.0);
        if severity >= self.cfg.high_threshold {
            Action::Irrigate
        } else if severity >= self.cfg.low_threshold {
            Action::Alert
        } else {
            Action::None
        }
    }

    pub fn decision(&self, result: &DetectionResult) -> Decision {
        let action = self.decide(result);
        let duration_ms = match action {
            Action::Irrigate => self.cfg.irrigate_ms,
            _ => 0,
        };
        Decision { action, duration_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decider() -> ActuationDecider {
        ActuationDecider::new(ActuationConfig { low_threshold: 30.0, high_threshold: 70.0, ..ActuationConfig::default() })
    }

    #[test]
    fn high_severity_irrigates() {
        let r = DetectionResult::classified(0, 0.9, "early_blight", 80.0);
        assert_eq!(decider().decide(&r), Action::Irrigate);
        assert_eq!(decider().decision(&r).duration_ms, 3000);
    }

    #[test]
    fn threshold_boundaries() {
        let d = decider();
        assert_eq!(d.decide(&DetectionResult::classified(0, 0.9, "rust", 70.0)), Action::Irrigate);
        assert_eq!(d.decide(&DetectionResult::classified(0, 0.9, "rust", 69.9)), Action::Alert);
        assert_eq!(d.decide(&DetectionResult::classified(0, 0.9, "rust", 30.0)), Action::Alert);
        assert_eq!(d.decide(&DetectionResult::classified(0, 0.9, "rust", 29.9)), Action::None);
    }

    #[test]
    fn healthy_and_errors_do_nothing() {
        let d = decider();
        assert_eq!(d.decide(&DetectionResult::classified(0, 0.9, "healthy", 95.0)), Action::None);
        assert_eq!(d.decide(&DetectionResult::failed(0, 0.9, "timeout")), Action::None);
        assert_eq!(d.decision(&DetectionResult::failed(0, 0.9, "timeout")).duration_ms, 0);
    }
}
