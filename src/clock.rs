use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of wall-clock timestamps for generated readings.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock anchored once and advanced by tokio's monotonic clock.
///
/// Timestamps never go backwards even if the system clock is adjusted, and
/// they follow `tokio::time::pause`/`advance` in tests.
#[derive(Debug, Clone)]
pub struct RuntimeClock {
    origin_utc: DateTime<Utc>,
    origin: Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            origin_utc: Utc::now(),
            origin: Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.origin_utc + elapsed
    }
}
