//! Tracing subscriber setup.
//!
//! Filtering follows `RUST_LOG` when set and defaults to `parlametric=info`
//! otherwise. Output goes to stderr so piped stdout stays machine-readable;
//! `RUST_LOG_FORMAT=json` switches to JSON lines.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "parlametric=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

fn json_requested() -> bool {
    std::env::var("RUST_LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Install the global subscriber. Idempotent: later calls are no-ops.
pub fn init() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json_requested() {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
