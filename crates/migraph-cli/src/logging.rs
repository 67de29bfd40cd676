use tracing_subscriber::EnvFilter;

/// Filter variable consulted when `--verbose` is not given.
pub const LOG_ENV: &str = "MIGRAPH_LOG";
const DEFAULT_LEVEL: &str = "warn";

/// Installs the stderr subscriber. A second call is a no-op.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
