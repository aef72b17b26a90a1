use chrono::{DateTime, Utc};

/// Wall-clock source for event timestamps and health records. Scheduling runs on the
/// monotonic tokio clock instead.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
