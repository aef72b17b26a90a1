mod clock;
mod health;
mod rotation;
mod schedule;

pub use clock::{Clock, SystemClock};
pub use health::{HealthSnapshot, HealthTracker, Heartbeat, RecordedError};
pub use rotation::Rotation;
pub use schedule::{Due, Schedule};

use crate::errors::AgentError;
use crate::model::{Location, PartitionKey, WeatherEvent};
use crate::services::{
    DeliveryReceipt, EventBus, FetchError, KafkaEventBus, OpenMeteoApi, PublishError, WeatherApi,
};
use crate::settings::{BusSettings, Settings};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderValue;
use std::future::Future;
use std::time::Duration;
use strum_macros::Display;
use thiserror::Error;
use tokio::signal;
use tokio::time::{self, Instant, MissedTickBehavior};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Failure of a single fetch/publish cycle. The cycle is skipped; the next scheduled interval
/// retries.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to serialize weather event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl CycleError {
    pub fn class(&self) -> String {
        match self {
            Self::Fetch(error) => format!("FetchError::{}", error.variant()),
            Self::Serialize(_) => "SerializeError".to_string(),
            Self::Publish(error) => format!("PublishError::{}", error.variant()),
        }
    }
}

/// A confirmed publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub key: PartitionKey,
    pub receipt: DeliveryReceipt,
    pub payload: String,
    pub at: DateTime<Utc>,
}

pub struct Agent<W, B, C = SystemClock> {
    weather: W,
    bus: B,
    clock: C,
    bus_settings: BusSettings,
    poll_interval: Duration,
    schedule: Schedule,
    rotation: Rotation,
    health: HealthTracker,
    state: LifecycleState,
}

impl<W, B, C> std::fmt::Debug for Agent<W, B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("state", &self.state)
            .field("topic", &self.bus_settings.topic)
            .field("locations", &self.rotation.len())
            .finish()
    }
}

impl Agent<OpenMeteoApi, KafkaEventBus> {
    /// Startup: validates settings, builds the weather client and connects to the bus. Any
    /// failure here is fatal; there is no startup retry.
    #[tracing::instrument(level = "debug", skip(settings))]
    pub async fn build(settings: &Settings) -> Result<Self, AgentError> {
        tracing::info!(
            "Starting producer -> {}, topic={}",
            settings.bus.bootstrap,
            settings.bus.topic
        );

        if settings.locations.is_empty() {
            return Err(AgentError::NoLocations);
        }

        let user_agent = HeaderValue::from_str(&settings.weather.user_agent)?;
        let weather = OpenMeteoApi::new(
            settings.weather.base_url.clone(),
            user_agent,
            settings.weather.timeout,
        )?;
        let bus = KafkaEventBus::connect(&settings.bus).await?;
        tracing::info!(bootstrap=%settings.bus.bootstrap, "connected to message bus");

        Self::new(weather, bus, SystemClock, settings)
    }

    pub async fn run_until_stopped(self) {
        self.run_until(shutdown_signal()).await
    }
}

impl<W, B, C> Agent<W, B, C>
where
    W: WeatherApi,
    B: EventBus,
    C: Clock,
{
    pub fn new(weather: W, bus: B, clock: C, settings: &Settings) -> Result<Self, AgentError> {
        let rotation = Rotation::new(settings.locations.clone()).ok_or(AgentError::NoLocations)?;
        let schedule = Schedule::new(
            settings.schedule.heartbeat_interval,
            settings.schedule.publish_interval,
            Instant::now(),
        );

        Ok(Self {
            weather,
            bus,
            clock,
            bus_settings: settings.bus.clone(),
            poll_interval: settings.schedule.poll_interval,
            schedule,
            rotation,
            health: HealthTracker::default(),
            state: LifecycleState::Starting,
        })
    }

    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Polls the schedule until `shutdown` resolves, then releases the bus. Shutdown is only
    /// observed between ticks; an in-flight cycle finishes or times out first.
    pub async fn run_until<S>(mut self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        self.transition(LifecycleState::Running);

        let mut ticker = time::interval(self.poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    tracing::info!("Stopping by user...");
                    break;
                },

                _ = ticker.tick() => {
                    self.tick(Instant::now()).await;
                },
            }
        }

        self.transition(LifecycleState::Stopping);
        self.release().await;
        self.transition(LifecycleState::Stopped);
    }

    /// Runs whatever the schedule says is due at `now`: heartbeat first, then publish.
    pub async fn tick(&mut self, now: Instant) -> Due {
        let due = self.schedule.due(now);

        if due.heartbeat {
            self.emit_heartbeat();
        }

        if due.publish {
            // outcome is already logged and recorded in health
            let _ = self.publish_next().await;
        }

        due
    }

    pub fn emit_heartbeat(&self) {
        let heartbeat = Heartbeat::from_health(
            &self.bus_settings.bootstrap,
            &self.bus_settings.topic,
            &self.health,
        );

        match serde_json::to_string(&heartbeat) {
            Ok(beat) => tracing::info!("[HB] {beat}"),
            Err(error) => tracing::warn!(?error, ?heartbeat, "failed to serialize heartbeat"),
        }
    }

    /// One fetch -> build -> publish cycle for the next location in the rotation.
    pub async fn publish_next(&mut self) -> Result<Published, CycleError> {
        let location = self.rotation.next_location().clone();
        let outcome = self.publish_cycle(&location).await;

        match &outcome {
            Ok(published) => {
                self.health.record_success(published.at);
                tracing::info!(
                    "[SEND-OK] key={} -> partition={}, offset={}, payload={}",
                    published.key,
                    published.receipt.partition,
                    published.receipt.offset,
                    published.payload
                );
            },

            Err(error) => {
                self.health.record_error(error);
                tracing::error!(
                    city=%location.id,
                    trace=%error_trace(error),
                    "[SEND-ERR] {}: {error}",
                    error.class()
                );
            },
        }

        outcome
    }

    #[tracing::instrument(level = "debug", skip(self), fields(city = %location.id))]
    async fn publish_cycle(&self, location: &Location) -> Result<Published, CycleError> {
        let observation = self.weather.fetch(location.latitude, location.longitude).await?;

        let at = self.clock.now();
        let event = WeatherEvent::build(location, observation, at);
        let key = event.partition_key();
        let payload = event.to_json()?;

        let receipt = self.bus.publish(&self.bus_settings.topic, &key, payload.clone()).await?;
        Ok(Published { key, receipt, payload, at })
    }

    /// Best-effort flush then close, each bounded; failures are logged and dropped.
    async fn release(&mut self) {
        if let Err(error) = self.bus.flush(self.bus_settings.flush_timeout).await {
            tracing::warn!(?error, "failed to flush message bus during shutdown");
        }

        if let Err(error) = self.bus.close(self.bus_settings.close_timeout).await {
            tracing::warn!(?error, "failed to close message bus during shutdown");
        }

        tracing::info!("Producer closed.");
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::info!(from=%self.state, to=%next, "lifecycle transition");
        self.state = next;
    }
}

fn error_trace(error: &dyn std::error::Error) -> String {
    let mut trace = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        trace.push_str(&format!(" | caused by: {cause}"));
        source = cause.source();
    }
    trace
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Observation;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use claims::{assert_err, assert_ok, assert_some};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone)]
    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Sent {
        topic: String,
        key: String,
        payload: String,
    }

    #[derive(Debug, Clone, Default)]
    struct RecordingBus {
        sent: Arc<Mutex<Vec<Sent>>>,
        flushes: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl RecordingBus {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(
            &self, topic: &str, key: &PartitionKey, payload: String,
        ) -> Result<DeliveryReceipt, PublishError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(Sent { topic: topic.to_string(), key: key.to_string(), payload });
            Ok(DeliveryReceipt {
                topic: topic.to_string(),
                partition: 0,
                offset: (sent.len() - 1) as i64,
            })
        }

        async fn flush(&self, _timeout: Duration) -> Result<(), PublishError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self, _timeout: Duration) -> Result<(), PublishError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(PublishError::Closed)
        }
    }

    /// Bus that refuses the next send once armed, then recovers.
    #[derive(Debug, Clone, Default)]
    struct FlakyBus {
        inner: RecordingBus,
        fail_next: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EventBus for FlakyBus {
        async fn publish(
            &self, topic: &str, key: &PartitionKey, payload: String,
        ) -> Result<DeliveryReceipt, PublishError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(PublishError::AckTimeout(Duration::from_secs(10)));
            }
            self.inner.publish(topic, key, payload).await
        }

        async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
            self.inner.flush(timeout).await
        }

        async fn close(&self, timeout: Duration) -> Result<(), PublishError> {
            self.inner.close(timeout).await
        }
    }

    /// Weather service that is always down, counting attempts.
    #[derive(Debug, Clone, Default)]
    struct UnavailableWeather {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WeatherApi for UnavailableWeather {
        async fn fetch(&self, _latitude: f64, _longitude: f64) -> Result<Observation, FetchError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
                url: url::Url::parse("http://weather.invalid/v1/forecast").unwrap(),
            })
        }
    }

    fn tokyo_settings() -> Settings {
        Settings {
            locations: vec![Location::new("tokyo", 35.6762, 139.6503, "JP")],
            ..Settings::default()
        }
    }

    fn open_meteo_for(server: &MockServer, timeout: Duration) -> OpenMeteoApi {
        let base_url = url::Url::parse(&format!("{}/v1/forecast", server.uri())).unwrap();
        OpenMeteoApi::new(base_url, HeaderValue::from_static("weather-producer-test"), timeout)
            .unwrap()
    }

    fn tokyo_conditions() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "current": {
                "temperature_2m": 21.3,
                "relative_humidity_2m": 55,
                "wind_speed_10m": 4.2
            }
        }))
    }

    #[tokio::test]
    async fn test_cycle_publishes_one_event_for_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(tokyo_conditions())
            .expect(1)
            .mount(&server)
            .await;

        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        let bus = RecordingBus::default();
        let mut agent = assert_ok!(Agent::new(
            open_meteo_for(&server, Duration::from_secs(5)),
            bus.clone(),
            FixedClock(t),
            &tokyo_settings(),
        ));

        let published = assert_ok!(agent.publish_next().await);
        let expected_key = format!("wx-tokyo-{}", t.timestamp() / 60);
        assert_eq!(published.key.as_str(), expected_key);
        assert_eq!(published.at, t);

        let sent = bus.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "events");
        assert_eq!(sent[0].key, expected_key);

        let payload: serde_json::Value = serde_json::from_str(&sent[0].payload).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "source": "open-meteo",
                "ts": "2024-05-01T12:30:15Z",
                "city": "tokyo",
                "region": "JP",
                "lat": 35.6762,
                "lon": 139.6503,
                "temp_c": 21.3,
                "humidity": 55.0,
                "wind_speed": 4.2,
            })
        );

        assert_eq!(agent.health().snapshot(), HealthSnapshot { last_success: Some(t), last_error: None });
    }

    #[tokio::test]
    async fn test_fetch_timeout_skips_cycle_and_keeps_last_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(tokyo_conditions())
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(tokyo_conditions().set_delay(Duration::from_secs(2)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET")).respond_with(tokyo_conditions()).mount(&server).await;

        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        let bus = RecordingBus::default();
        let mut agent = assert_ok!(Agent::new(
            open_meteo_for(&server, Duration::from_millis(200)),
            bus.clone(),
            FixedClock(t),
            &tokyo_settings(),
        ));

        assert_ok!(agent.publish_next().await);
        assert_eq!(bus.sent().len(), 1);

        let error = assert_err!(agent.publish_next().await);
        assert_eq!(error.class(), "FetchError::Timeout");
        assert_eq!(bus.sent().len(), 1);

        let snapshot = agent.health().snapshot();
        assert_eq!(snapshot.last_success, Some(t));
        let recorded = assert_some!(snapshot.last_error);
        assert_eq!(recorded.class, "FetchError::Timeout");

        assert_ok!(agent.publish_next().await);
        assert_eq!(bus.sent().len(), 2);
        assert_eq!(agent.health().snapshot().last_error, None);
    }

    #[tokio::test]
    async fn test_bus_failure_skips_cycle_and_next_cycle_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(tokyo_conditions()).mount(&server).await;

        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        let bus = FlakyBus::default();
        let mut agent = assert_ok!(Agent::new(
            open_meteo_for(&server, Duration::from_secs(5)),
            bus.clone(),
            FixedClock(t),
            &tokyo_settings(),
        ));

        assert_ok!(agent.publish_next().await);
        assert_eq!(bus.inner.sent().len(), 1);

        bus.fail_next.store(true, Ordering::SeqCst);
        let error = assert_err!(agent.publish_next().await);
        assert!(matches!(error, CycleError::Publish(PublishError::AckTimeout(_))));
        assert_eq!(error.class(), "PublishError::AckTimeout");
        assert_eq!(bus.inner.sent().len(), 1);

        let snapshot = agent.health().snapshot();
        assert_eq!(snapshot.last_success, Some(t));
        let recorded = assert_some!(snapshot.last_error);
        assert_eq!(recorded.class, "PublishError::AckTimeout");
        assert_eq!(recorded.message, "message bus did not acknowledge within 10s");

        let published = assert_ok!(agent.publish_next().await);
        assert_eq!(published.receipt.offset, 1);
        assert_eq!(bus.inner.sent().len(), 2);
        assert_eq!(agent.health().snapshot(), HealthSnapshot { last_success: Some(t), last_error: None });
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_cadence_unaffected_by_failing_publishes() {
        let weather = UnavailableWeather::default();
        let mut agent = assert_ok!(Agent::new(
            weather.clone(),
            RecordingBus::default(),
            FixedClock(Utc::now()),
            &Settings::default(),
        ));

        let start = Instant::now();
        let mut heartbeats = 0;
        let mut publishes = 0;
        let mut offset = Duration::ZERO;
        while offset <= Duration::from_secs(180) {
            let due = agent.tick(start + offset).await;
            heartbeats += usize::from(due.heartbeat);
            publishes += usize::from(due.publish);
            offset += Duration::from_millis(200);
        }

        assert_eq!(heartbeats, 19);
        assert_eq!(publishes, 4);
        assert_eq!(weather.attempts.load(Ordering::SeqCst), 4);
        let recorded = assert_some!(agent.health().snapshot().last_error);
        assert_eq!(recorded.class, "FetchError::Status");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown_releases_bus() {
        let weather = UnavailableWeather::default();
        let bus = RecordingBus::default();
        let agent = assert_ok!(Agent::new(
            weather.clone(),
            bus.clone(),
            FixedClock(Utc::now()),
            &Settings::default(),
        ));
        assert_eq!(agent.state(), LifecycleState::Starting);

        agent.run_until(time::sleep(Duration::from_secs(130))).await;

        // publish fires at 0s, 60s and 120s
        assert_eq!(weather.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(bus.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(bus.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_agent_requires_locations() {
        let settings = Settings { locations: vec![], ..Settings::default() };
        let error = assert_err!(Agent::new(
            UnavailableWeather::default(),
            RecordingBus::default(),
            SystemClock,
            &settings,
        ));
        assert!(matches!(error, AgentError::NoLocations));
    }

    #[test]
    fn test_error_trace_includes_sources() {
        let error = CycleError::Publish(PublishError::Flush(Duration::from_secs(5)));
        assert_eq!(error_trace(&error), "message bus flush did not complete within 5s");
        assert_eq!(LifecycleState::Stopping.to_string(), "STOPPING");
    }
}
