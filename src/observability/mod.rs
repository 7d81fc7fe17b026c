pub mod token_counter;
pub mod usage;

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::observability::usage::ScaledUsage;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// `LogFormat::Json` emits one JSON object per line.
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let Some(level) = tracing_filter_for(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Filter directive for a configured log level, `None` when disabled.
#[must_use]
pub fn tracing_filter_for(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Log token usage for a completed request, computing duration from start time.
pub fn log_request_complete(
    model: &str,
    backend: &str,
    usage: &ScaledUsage,
    start_time: std::time::Instant,
) {
    token_counter::log_request_usage(model, backend, usage, start_time.elapsed());
}
