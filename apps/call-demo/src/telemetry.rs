use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Used when the configured filter does not parse.
pub const FALLBACK_FILTER: &str = "info,call=debug";

/// Install the fmt subscriber. Targets are kept because session, driver and
/// webrtc logs are told apart by their `call.*` target.
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);
    Registry::default().with(env_filter).with(fmt_layer).init();
}
