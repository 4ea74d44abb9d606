//! Tracing subscriber setup for the server binary

use tracing_subscriber::EnvFilter;

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Install the global subscriber.
///
/// An unparseable `filter` falls back to `info`. Fails only when a global
/// subscriber is already installed.
pub fn init_tracing(filter: &str, json: bool) -> Result<(), InitError> {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    }
}
