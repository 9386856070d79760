use std::env::var;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with a default level taken from configuration.
///
/// Honours `RUST_LOG_FORMAT` (`json` or compact). Unknown level names fall
/// back to `info`. `RUST_LOG` still wins over the default directive.
pub fn init_tracing_with(level: &str) {
    let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    initialize_tracing(level);
}

fn initialize_tracing(level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT").unwrap_or_default();

    let log_layer = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    // A second initialisation (tests, embedding) is not fatal.
    if tracing_subscriber::registry().with(log_layer).try_init().is_err() {
        warn!("tracing subscriber already initialised, keeping the existing one");
    }
}
