use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "STORY_LOG";

/// Diagnostics go to stderr so stdout stays machine readable.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
