use crate::config::LogConfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Map a configured level name to a filter. Unknown names mean `info`.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(&config.level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if config.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
