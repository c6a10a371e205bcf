//! Diagnostic logging setup.

use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the verbosity-derived filter.
pub const LOG_ENV_VAR: &str = "FEDINDEX_LOG";

/// Map `-v` counts to a default filter directive.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber writing to stderr.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(verbosity: u8, json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
