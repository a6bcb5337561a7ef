//! Tracing subscriber setup shared by the binaries.

use crate::config::Config;
use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence; without it the configured `application.log_level`
/// applies. Logs go to stderr so stdout stays free for progress lines. Calling
/// this twice is harmless: the second install is ignored.
pub fn init(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
