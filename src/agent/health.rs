use super::CycleError;
use chrono::{DateTime, Utc};
use serde::Serialize;

const LAST_SEND_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    pub class: String,
    pub message: String,
}

impl std::fmt::Display for RecordedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl From<&CycleError> for RecordedError {
    fn from(error: &CycleError) -> Self {
        Self { class: error.class(), message: error.to_string() }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<RecordedError>,
}

/// Outcome of the most recent publish attempts. A success clears the error; an error leaves
/// the last success in place.
#[derive(Debug, Default)]
pub struct HealthTracker {
    last_success: Option<DateTime<Utc>>,
    last_error: Option<RecordedError>,
}

impl HealthTracker {
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_success = Some(at);
        self.last_error = None;
    }

    pub fn record_error(&mut self, error: &CycleError) {
        self.last_error = Some(error.into());
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            last_success: self.last_success,
            last_error: self.last_error.clone(),
        }
    }
}

/// Liveness line payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heartbeat<'a> {
    pub alive: bool,
    pub bootstrap: &'a str,
    pub topic: &'a str,
    pub last_send_ok: Option<String>,
    pub last_error: Option<String>,
}

impl<'a> Heartbeat<'a> {
    pub fn from_health(bootstrap: &'a str, topic: &'a str, health: &HealthTracker) -> Self {
        let snapshot = health.snapshot();
        Self {
            alive: true,
            bootstrap,
            topic,
            last_send_ok: snapshot.last_success.map(|at| at.format(LAST_SEND_FORMAT).to_string()),
            last_error: snapshot.last_error.map(|error| error.message),
        }
    }
}
