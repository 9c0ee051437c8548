use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "GLYPHCAST_LOG";
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the stderr subscriber. Filter comes from `GLYPHCAST_LOG`
/// (`RUST_LOG` syntax), `info` when unset or unparsable. Repeated calls are
/// no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
