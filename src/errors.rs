use crate::services::{ConnectError, FetchError};
use reqwest::header::InvalidHeaderValue;
use thiserror::Error;

/// Conditions that stop the agent before it reaches its running state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentError {
    #[error("no locations configured to poll")]
    NoLocations,

    #[error("invalid weather client user agent: {0}")]
    UserAgent(#[from] InvalidHeaderValue),

    #[error("failed to build weather client: {0}")]
    Weather(#[from] FetchError),

    #[error("{0}")]
    FatalStartup(#[from] ConnectError),
}
