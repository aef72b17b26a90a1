#![forbid(unsafe_code)]
#![warn(clippy::cargo, clippy::suspicious, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions)]

pub mod agent;
mod errors;
pub mod model;
pub mod services;
pub mod settings;
pub mod tracing;

pub use agent::{shutdown_signal, Agent, LifecycleState};
pub use errors::AgentError;
pub use settings::{CliOptions, LogFormat, Settings};
