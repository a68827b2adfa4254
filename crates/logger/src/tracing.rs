use std::env::var;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber at the default INFO level.
pub fn init() {
    init_with_level(LevelFilter::INFO);
}

/// Initialize the global tracing subscriber with an explicit default level.
///
/// `RUST_LOG` overrides the default level per target. `VIGIL_LOG_FORMAT=json`
/// switches the output layer to newline-delimited JSON, which is what the
/// fleet log shipper expects; anything else gets the compact human format.
pub fn init_with_level(level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let format = var("VIGIL_LOG_FORMAT").unwrap_or_default();

    let layer = match format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        _ => tracing_subscriber::fmt::layer().compact().with_filter(env_filter).boxed(),
    };

    tracing_subscriber::registry().with(layer).init();
}
