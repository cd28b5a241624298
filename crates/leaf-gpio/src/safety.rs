use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct SprayRateLimit {
    last_spray: Option<Instant>,
    min_interval: Duration,
}

impl SprayRateLimit {
    pub fn new(min_interval: Duration) -> Self {
        Self { last_spray: None, min_interval }
    }

    pub fn allow_spray(&mut self) -> bool {
        let now = Instant::now();
        if let Some(t) = self.last_spray {
            if now.duration_since(t) < self.min_interval { return false; }
        }
        self.last_spray = Some(now);
        true
    }
}
