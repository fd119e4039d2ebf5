use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber. Returns an error when a
/// subscriber is already installed, so callers can `.ok()` it.
pub fn init() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}
