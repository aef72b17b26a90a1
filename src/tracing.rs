use crate::settings::LogFormat;
use tracing::subscriber::set_global_default;
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Builds the process subscriber. `RUST_LOG` takes precedence over `env_filter`.
pub fn get_tracing_subscriber(env_filter: &str, format: LogFormat) -> impl Subscriber + Send + Sync {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    let (text_layer, bunyan_layer) = match format {
        LogFormat::Text => {
            let layer = fmt::layer()
                .with_timer(ChronoUtc::new(TIMESTAMP_FORMAT.to_string()))
                .with_target(false);
            (Some(layer), None)
        },

        LogFormat::Json => {
            let layer =
                BunyanFormattingLayer::new(env!("CARGO_PKG_NAME").to_string(), std::io::stdout);
            (None, Some(layer))
        },
    };

    Registry::default()
        .with(env_filter)
        .with(text_layer)
        .with(bunyan_layer.is_some().then_some(JsonStorageLayer))
        .with(bunyan_layer)
}

/// Installs the subscriber globally and routes `log` records (e.g., from the Kafka client)
/// into it. Must be called once.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    LogTracer::init().expect("Failed to set logger");
    set_global_default(subscriber).expect("Failed to set subscriber");
}
