use crate::model::{default_locations, Location};
use crate::services::open_meteo;
use clap::{Parser, ValueEnum};
use config::ConfigError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "WX";

/// Polls Open-Meteo for a fixed set of locations and publishes readings onto Kafka.
#[derive(Debug, Clone, Parser, PartialEq, Eq)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Optional settings file (yaml, toml or json).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Kafka bootstrap address(es), comma separated.
    #[arg(long, env = "BOOTSTRAP")]
    pub bootstrap: Option<String>,

    /// Topic readings are published to.
    #[arg(long, env = "TOPIC")]
    pub topic: Option<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bus: BusSettings,
    pub weather: WeatherSettings,
    pub schedule: ScheduleSettings,
    pub locations: Vec<Location>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bus: BusSettings::default(),
            weather: WeatherSettings::default(),
            schedule: ScheduleSettings::default(),
            locations: default_locations(),
        }
    }
}

impl Settings {
    /// Layers built-in defaults, the optional settings file, `WX__`-prefixed environment
    /// variables and finally the `BOOTSTRAP`/`TOPIC` options.
    #[tracing::instrument(level = "debug")]
    pub fn load(options: &CliOptions) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = &options.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .set_override_option("bus.bootstrap", options.bootstrap.clone())?
            .set_override_option("bus.topic", options.topic.clone())?
            .build()?;

        settings.try_deserialize()
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub bootstrap: String,
    pub topic: String,
    pub client_id: String,
    pub retries: u32,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "connect_timeout_secs")]
    pub connect_timeout: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "ack_timeout_secs")]
    pub ack_timeout: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "flush_timeout_secs")]
    pub flush_timeout: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "close_timeout_secs")]
    pub close_timeout: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            bootstrap: "localhost:9092".to_string(),
            topic: "events".to_string(),
            client_id: env!("CARGO_PKG_NAME").to_string(),
            retries: 3,
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            flush_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl BusSettings {
    /// Deadline for any single socket read or write against a broker.
    pub fn io_timeout(&self) -> Duration {
        self.connect_timeout.min(self.ack_timeout)
    }

    pub fn bootstrap_hosts(&self) -> Vec<String> {
        self.bootstrap
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSettings {
    pub base_url: url::Url,
    pub user_agent: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "timeout_secs")]
    pub timeout: Duration,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            base_url: url::Url::parse(open_meteo::DEFAULT_BASE_URL)
                .unwrap_or_else(|err| panic!("invalid default weather url: {err}")),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(15),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "heartbeat_interval_secs")]
    pub heartbeat_interval: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "publish_interval_secs")]
    pub publish_interval: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_millis")]
    pub poll_interval: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            publish_interval: Duration::from_secs(60),
            poll_interval: Duration::from_millis(200),
        }
    }
}
