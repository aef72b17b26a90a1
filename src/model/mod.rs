mod event;

pub use event::{PartitionKey, WeatherEvent, EVENT_SOURCE};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct LocationId(SmolStr);

impl LocationId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for LocationId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

/// A fixed point the agent polls weather for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub latitude: f64,
    pub longitude: f64,
    pub region: SmolStr,
}

impl Location {
    pub fn new(id: &str, latitude: f64, longitude: f64, region: &str) -> Self {
        Self {
            id: LocationId::new(id),
            latitude,
            longitude,
            region: region.into(),
        }
    }
}

pub fn default_locations() -> Vec<Location> {
    vec![
        Location::new("tokyo", 35.6762, 139.6503, "JP"),
        Location::new("beijing", 39.9042, 116.4074, "CN"),
        Location::new("newyork", 40.7128, -74.0060, "US"),
        Location::new("london", 51.5074, -0.1278, "UK"),
        Location::new("sydney", -33.8688, 151.2093, "AU"),
    ]
}

/// Current conditions as reported by the weather service. Any field the service omits stays
/// `None`; it is never filled in with a default reading.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub temperature_c: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}
