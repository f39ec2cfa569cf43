//! Tracing subscriber setup for the binaries.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate and `warn` to everything else.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is absent.
pub fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("warn,pvdaq={}", level))
}

/// Install the global fmt subscriber. Safe to call more than once.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_crate_level() {
        let filter = default_filter("debug");
        let rendered = filter.to_string();
        assert!(rendered.contains("pvdaq=debug"));
        assert!(rendered.contains("warn"));
    }
}
