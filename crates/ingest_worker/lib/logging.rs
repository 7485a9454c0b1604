use crate::build_info;
use std::error::Error as StdError;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for runtime logs, read from `LOG_FORMAT` (`json` or `text`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Self::Text,
            _ => Self::Json,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

/// Process-level fields attached to the bootstrap event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingContext {
    pub service: String,
    pub environment: String,
    pub run_id: String,
    pub format: LogFormat,
}

/// Installs the global subscriber and emits one `logging_initialized` event.
///
/// `log` records emitted by dependencies are bridged into `tracing`, and `RUST_LOG` takes
/// precedence over `default_level` when set.
pub fn init_logging(service: &str, default_level: &str) -> LoggingContext {
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
    let context = LoggingContext {
        service: service.to_string(),
        environment: std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string()),
        run_id: process_run_id(service),
        format,
    };

    let _ = LogTracer::init();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };

    tracing::info!(
        event = "logging_initialized",
        service = %context.service,
        environment = %context.environment,
        run_id = %context.run_id,
        build_version = build_info::VERSION,
        build_commit = build_info::short_commit_hash(),
        log_format = format.as_str(),
        "initialized logging"
    );

    context
}

fn process_run_id(service: &str) -> String {
    let epoch_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("{service}-{}-{epoch_millis}", std::process::id())
}

/// Renders an error with its whole `source()` chain, one cause per line.
///
/// Used at process boundaries, where `%err` alone would hide the transport failure wrapped by
/// a client error.
pub fn format_error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut report = err.to_string();
    let mut source = err.source();
    let mut depth = 1usize;
    while let Some(cause) = source {
        report.push_str(&format!("\ncaused by ({depth}): {cause}"));
        source = cause.source();
        depth += 1;
    }
    report
}

#[cfg(test)]
mod tests {
    use super::{format_error_chain, LogFormat};
    use std::fmt;

    #[derive(Debug)]
    struct Outer(Inner);
    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "load failed")
        }
    }
    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection reset")
        }
    }
    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }
    impl std::error::Error for Inner {}

    #[test]
    fn error_chain_lists_every_cause() {
        let report = format_error_chain(&Outer(Inner));
        assert_eq!(report, "load failed\ncaused by (1): connection reset");
    }

    #[test]
    fn unknown_log_format_falls_back_to_json() {
        assert_eq!(LogFormat::parse("TEXT"), LogFormat::Text);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Json);
        assert_eq!(LogFormat::parse(""), LogFormat::Json);
    }
}
