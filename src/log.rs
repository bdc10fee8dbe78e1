//! Structured logging for ragent.
//!
//! Log levels:
//! - ERROR: Failures that end the process
//! - WARN: Step failures, retries and aborted runs
//! - INFO: Run start and finish
//! - DEBUG: Scheduling decisions, requests and config loading
//!
//! Logs go to stderr so stdout stays clean for the JSON result. Debug mode
//! can be enabled with the `--debug` flag or `RAGENT_DEBUG=1`; `RUST_LOG`
//! takes precedence over both.

use tracing_subscriber::EnvFilter;

pub const DEBUG_ENV: &str = "RAGENT_DEBUG";

/// Initialize logging at the default level.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_with_debug(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug || env_debug())));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Check whether `RAGENT_DEBUG` requests debug output.
pub fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "ragent=debug,warn"
    } else {
        "ragent=info,warn"
    }
}
