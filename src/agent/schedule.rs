use std::time::Duration;
use tokio::time::Instant;

/// Which actions fire on a tick.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Due {
    pub heartbeat: bool,
    pub publish: bool,
}

/// Two independent fire times on one monotonic timeline. Each interval is measured from the
/// instant the action actually fired, so late ticks drift the phase rather than bunching up.
#[derive(Debug, Clone)]
pub struct Schedule {
    heartbeat_interval: Duration,
    publish_interval: Duration,
    next_heartbeat_at: Instant,
    next_publish_at: Instant,
}

impl Schedule {
    /// Both actions are due on the first check at or after `start`.
    pub fn new(heartbeat_interval: Duration, publish_interval: Duration, start: Instant) -> Self {
        Self {
            heartbeat_interval,
            publish_interval,
            next_heartbeat_at: start,
            next_publish_at: start,
        }
    }

    pub fn due(&mut self, now: Instant) -> Due {
        Due {
            heartbeat: fire_if_due(&mut self.next_heartbeat_at, self.heartbeat_interval, now),
            publish: fire_if_due(&mut self.next_publish_at, self.publish_interval, now),
        }
    }

    pub fn next_heartbeat_at(&self) -> Instant {
        self.next_heartbeat_at
    }

    pub fn next_publish_at(&self) -> Instant {
        self.next_publish_at
    }
}

#[inline]
fn fire_if_due(next_at: &mut Instant, interval: Duration, now: Instant) -> bool {
    if now < *next_at {
        return false;
    }

    *next_at = now + interval;
    true
}
