//! Tracing initialisation for embedders and tests.

use crate::types::{AppError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber.
///
/// `RUST_LOG` wins over `level`; an unparseable level falls back to `info`.
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    installed.map_err(|e| AppError::Configuration(format!("tracing already initialised: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_instead_of_panicking() {
        let _ = init_tracing("debug", false);
        assert!(init_tracing("debug", true).is_err());
    }
}
