//! GrantCraft Logging
//!
//! Shared `tracing` subscriber setup for the service and CLI binaries.
//! `RUST_LOG` takes precedence over the built-in filters.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,grantcraft=debug"
    } else {
        "info"
    }
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(false), "info");
        assert!(default_filter(true).contains("grantcraft=debug"));
    }

    #[test]
    fn test_init_twice() {
        init_logging(false);
        init_logging(true);
        tracing::info!("logging initialized");
    }
}
