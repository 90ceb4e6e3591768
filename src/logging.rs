//! Logging bootstrap.
//!
//! Console output through `tracing-subscriber`, filtered by `RUST_LOG`
//! when it is set and by the given default otherwise.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor the caller say otherwise.
pub fn default_filter() -> &'static str {
    "info,tilemap_studio=debug"
}

/// Installs the global subscriber.
///
/// Fails instead of panicking when a subscriber is already installed, so
/// tests and embedding applications can call it more than once.
pub fn init_logging(default_filter: &str) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_an_error_not_a_panic() {
        // Another test may already have installed one.
        let _ = init_logging(default_filter());
        assert!(init_logging("warn").is_err());
    }
}
