use std::sync::Once;

use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "BTC100_LOG";

fn env_filters() -> String {
    filters_from(|key| std::env::var(key).ok())
}

/// First non-empty of `BTC100_LOG`, `RUST_LOG`, else `info`.
fn filters_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    [LOG_ENV, "RUST_LOG"]
        .into_iter()
        .filter_map(|key| lookup(key))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| level_to_str(LevelFilter::Info).to_string())
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

fn parse_level(input: Option<&str>) -> Option<LevelFilter> {
    input.and_then(|s| s.trim().parse::<LevelFilter>().ok())
}

/// Initialize stderr logging based on `BTC100_LOG`/`RUST_LOG`.
///
/// Safe to call multiple times; the logger is installed on first call.
pub fn init_rust_logging() {
    init_with_filters(&env_filters());
}

/// Initialize stderr logging at `level` (or the env filters when `None` or
/// unparsable), e.g. `init_logging_str(Some("debug"))`.
///
/// An explicit level is not overridden by the environment.
pub fn init_logging_str(level: Option<&str>) {
    match parse_level(level) {
        Some(level) => init_with_filters(level_to_str(level)),
        None => init_rust_logging(),
    }
}

fn init_with_filters(filters: &str) {
    RUST_LOG_ONCE.call_once(|| {
        let _ = env_logger::Builder::new()
            .parse_filters(filters)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(true)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels() {
        assert_eq!(parse_level(Some("debug")), Some(LevelFilter::Debug));
        assert_eq!(parse_level(Some(" WARN ")), Some(LevelFilter::Warn));
        assert_eq!(parse_level(Some("off")), Some(LevelFilter::Off));
        assert_eq!(parse_level(Some("loud")), None);
        assert_eq!(parse_level(None), None);
    }

    #[test]
    fn level_names_round_trip() {
        for level in [
            LevelFilter::Off,
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
            LevelFilter::Trace,
        ] {
            assert_eq!(parse_level(Some(level_to_str(level))), Some(level));
        }
    }

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn btc100_log_wins_over_rust_log() {
        let filters = filters_from(lookup(&[("BTC100_LOG", "debug"), ("RUST_LOG", "warn")]));
        assert_eq!(filters, "debug");
        assert_eq!(parse_level(Some(&filters)), Some(LevelFilter::Debug));
    }

    #[test]
    fn rust_log_is_the_fallback() {
        assert_eq!(filters_from(lookup(&[("RUST_LOG", "warn")])), "warn");
        assert_eq!(
            filters_from(lookup(&[("BTC100_LOG", " "), ("RUST_LOG", "btc100=trace")])),
            "btc100=trace"
        );
        assert_eq!(filters_from(lookup(&[])), "info");
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_logging_str(Some("debug"));
        init_rust_logging();
        log::debug!("logging initialized twice");
    }
}
