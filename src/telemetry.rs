use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `contemplation=debug`.
pub const LOG_ENV: &str = "CONTEMPLATION_LOG";

/// Install the global subscriber. Falls back to `info` when `CONTEMPLATION_LOG`
/// is unset or unparsable.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
