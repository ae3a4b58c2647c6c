use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Build the log filter: `RUST_LOG` wins over the configured level
pub fn log_filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global `tracing` subscriber.
///
/// Calling it again after a subscriber is installed is a no-op, so tests and
/// embedding applications may call it freely.
pub fn init_logging(config: &LoggingConfig) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(config))
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging(&LoggingConfig::default());
        init_logging(&LoggingConfig::default());
    }
}
