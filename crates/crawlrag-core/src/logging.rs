//! Logging setup for binaries built on this crate.
//!
//! `RUST_LOG` takes precedence over the `[logging]` section of the config:
//! ```bash
//! RUST_LOG=crawlrag_core=debug crawlrag ingest ./crawl
//! ```

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Initialize the global subscriber. Only the first call takes effect.
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(config.filter_directive())
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter);

        if let Err(e) = tracing_subscriber::registry().with(fmt_layer).try_init() {
            eprintln!("logging already initialized: {e}");
        }
    });
}
