use crate::model::Observation;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use strum_macros::IntoStaticStr;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m";

#[async_trait]
pub trait WeatherApi: Send + Sync {
    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<Observation, FetchError>;
}

#[derive(Debug, Error, IntoStaticStr)]
pub enum FetchError {
    #[error("supplied Weather API url is not a base url to query: {0}")]
    NotABaseUrl(Url),

    #[error("Weather API call timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("Weather API unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("Weather API responded with {status} for {url}")]
    Status { status: StatusCode, url: Url },

    #[error("failed to parse Weather API JSON response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("Weather API call failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error)
        } else if error.is_connect() {
            Self::Unreachable(error)
        } else if error.is_decode() {
            Self::Decode(error)
        } else {
            Self::Request(error)
        }
    }
}

impl FetchError {
    pub fn variant(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: Option<CurrentConditions>,
}

#[derive(Debug, Default, Deserialize)]
struct CurrentConditions {
    #[serde(default)]
    temperature_2m: Option<f64>,

    #[serde(default)]
    relative_humidity_2m: Option<f64>,

    #[serde(default)]
    wind_speed_10m: Option<f64>,
}

impl From<ForecastResponse> for Observation {
    fn from(response: ForecastResponse) -> Self {
        let current = response.current.unwrap_or_default();
        Self {
            temperature_c: current.temperature_2m,
            humidity: current.relative_humidity_2m,
            wind_speed: current.wind_speed_10m,
        }
    }
}

/// Client for the Open-Meteo forecast endpoint. Each call is a single request bounded by the
/// configured timeout; retrying is left to the caller's schedule.
#[derive(Debug, Clone)]
pub struct OpenMeteoApi {
    client: reqwest::Client,
    base_url: Url,
}

impl OpenMeteoApi {
    pub fn new(
        base_url: impl Into<Url>, user_agent: HeaderValue, timeout: Duration,
    ) -> Result<Self, FetchError> {
        let base_url = base_url.into();
        if base_url.cannot_be_a_base() {
            return Err(FetchError::NotABaseUrl(base_url));
        }

        let client = Self::make_http_client(user_agent, timeout)?;

        Ok(Self { client, base_url })
    }

    fn make_http_client(
        user_agent: HeaderValue, timeout: Duration,
    ) -> Result<reqwest::Client, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, user_agent);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .pool_max_idle_per_host(2)
            .build()?;

        Ok(client)
    }

    fn forecast_url(&self, latitude: f64, longitude: f64) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("latitude", &latitude.to_string())
            .append_pair("longitude", &longitude.to_string())
            .append_pair("current", CURRENT_FIELDS);
        url
    }
}

#[async_trait]
impl WeatherApi for OpenMeteoApi {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<Observation, FetchError> {
        let url = self.forecast_url(latitude, longitude);
        let response = self.client.get(url.clone()).send().await?;
        log_response("current", &url, &response);

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { status, url });
        }

        let body: ForecastResponse = response.json().await?;
        tracing::debug!(?body, %url, "current conditions response body");
        Ok(body.into())
    }
}

fn log_response(label: &str, endpoint: &Url, response: &reqwest::Response) {
    const MESSAGE: &str = "response recd from open-meteo";
    let status = response.status();
    if status.is_success() || status.is_informational() {
        tracing::debug!(%endpoint, %status, "{label}: {MESSAGE}");
    } else {
        tracing::warn!(%endpoint, %status, "{label}: {MESSAGE}");
    }
}
