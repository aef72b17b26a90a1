use super::{Location, LocationId, Observation};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Serialize, Serializer};
use smol_str::SmolStr;

pub const EVENT_SOURCE: &str = "open-meteo";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const KEY_BUCKET_SECS: i64 = 60;

/// Normalized weather reading as it is published onto the bus. Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherEvent {
    pub source: &'static str,

    #[serde(serialize_with = "serialize_timestamp")]
    pub ts: DateTime<Utc>,

    pub city: LocationId,
    pub region: SmolStr,
    pub lat: f64,
    pub lon: f64,
    pub temp_c: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

impl WeatherEvent {
    /// Assembles the event for a location. `now` should be captured after the fetch returned;
    /// it is truncated to whole seconds.
    pub fn build(location: &Location, observation: Observation, now: DateTime<Utc>) -> Self {
        Self {
            source: EVENT_SOURCE,
            ts: now.trunc_subsecs(0),
            city: location.id.clone(),
            region: location.region.clone(),
            lat: location.latitude,
            lon: location.longitude,
            temp_c: observation.temperature_c,
            humidity: observation.humidity,
            wind_speed: observation.wind_speed,
        }
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(&self.city, self.ts)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

/// Minute-bucketed key per location: `wx-<id>-<floor(unix_secs / 60)>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(location: &LocationId, at: DateTime<Utc>) -> Self {
        let bucket = at.timestamp().div_euclid(KEY_BUCKET_SECS);
        Self(format!("wx-{location}-{bucket}"))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PartitionKey {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}
