//! Structured logging via the tracing crate
//!
//! Output format is selected with `LOG_FORMAT` (`json`, `pretty`, `compact`),
//! the level with `LOG_LEVEL`, span events with `LOG_SPANS`; `RUST_LOG`
//! overrides the filter entirely. JSON is the default so production logs land
//! aggregation-ready.

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Structured JSON (machine-readable)
    Json,
    /// Colors and indentation for development
    Pretty,
    /// Colors, minimal spacing, terminal-friendly
    Compact,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Initialize logging with explicit settings
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let mut filter = EnvFilter::new(level.to_string())
        // Keep dependency noise down at default levels
        .add_directive("tokio_tungstenite=warn".parse().unwrap())
        .add_directive("tungstenite=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("warp=warn".parse().unwrap());

    if let Ok(rust_log) = env::var("RUST_LOG") {
        filter = EnvFilter::new(rust_log);
    }

    let span_events = if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_span_events(span_events))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .pretty()
                        .with_ansi(true)
                        .with_span_events(span_events),
                )
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(
                    fmt::layer()
                        .compact()
                        .with_ansi(true)
                        .with_target(false)
                        .with_span_events(span_events),
                )
                .init();
        }
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    let level = match env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "INFO".to_string())
        .to_uppercase()
        .as_str()
    {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    };

    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));

    let include_spans = env::var("LOG_SPANS")
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false);

    init_logging(level, format, include_spans);
}
