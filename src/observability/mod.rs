use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Map a config log level to a tracing filter directive.
///
/// Returns `None` for `DISABLED`.
#[must_use]
pub fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// `json` switches the formatter to one JSON object per line.
pub fn init_tracing(log_level: &str, json: bool) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// One structured line per finished chat completion.
pub fn log_request_complete(
    model: &str,
    stream: bool,
    content_chars: usize,
    reasoning_chars: usize,
    started: Instant,
) {
    info!(
        target: "zai_proxy::request",
        model = model,
        stream = stream,
        content_chars = content_chars,
        reasoning_chars = reasoning_chars,
        duration_seconds = started.elapsed().as_secs_f64(),
        "request completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(tracing_directive("disabled"), None);
        assert_eq!(tracing_directive("WARNING").as_deref(), Some("WARN"));
        assert_eq!(tracing_directive("critical").as_deref(), Some("ERROR"));
        assert_eq!(tracing_directive("debug").as_deref(), Some("DEBUG"));
    }
}
