//! Process-wide tracing setup

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default directive when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("countdown={level},services={level},utils={level},warn")
}

/// Install the global subscriber. Call once, before anything logs.
///
/// `RUST_LOG` always wins over `verbose`. With `json` set, events are
/// emitted as one JSON object per line.
pub fn init(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_levels() {
        assert!(default_directive(false).starts_with("countdown=info"));
        assert!(default_directive(true).contains("services=debug"));
        assert!(default_directive(true).ends_with(",warn"));
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init(false, false);
        init(true, true);
    }
}
