use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Level used when the configured one does not parse.
const FALLBACK_LEVEL: &str = "debug";

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init(level: &str) {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(level))
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_level_is_used() {
        assert_eq!(level_filter("warn").to_string(), "warn");
    }

    #[test]
    fn unknown_level_falls_back_to_debug() {
        assert_eq!(level_filter("signq=loudest").to_string(), "debug");
    }
}
