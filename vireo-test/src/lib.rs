//! Shared test infrastructure: a process-wide tracing subscriber for test
//! output, installed at most once.

use std::sync::Once;

use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize a tracing subscriber for a test.
///
/// Reads the `RUST_LOG` environment filter, defaulting to `info`. Safe to
/// call from every test; only the first call installs the subscriber.
pub fn init() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .with(ErrorLayer::default())
            .try_init();
    });
}
