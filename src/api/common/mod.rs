pub(crate) mod non_streaming;
pub(crate) mod streaming;

use std::time::Instant;

use crate::observability::log_request_complete;

pub(crate) use non_streaming::{aggregate_chat_response, AggregateContext};
pub use non_streaming::aggregate_body;
pub(crate) use streaming::stream_chat_response;

/// Per-request output counters, logged once when the response is complete.
pub(crate) struct CompletionLog {
    model: String,
    stream: bool,
    started: Instant,
    pub content_chars: usize,
    pub reasoning_chars: usize,
}

impl CompletionLog {
    pub(crate) fn new(model: &str, stream: bool, started: Instant) -> Self {
        Self {
            model: model.to_string(),
            stream,
            started,
            content_chars: 0,
            reasoning_chars: 0,
        }
    }

    pub(crate) fn finish(&self) {
        if self.content_chars == 0 && self.reasoning_chars == 0 {
            tracing::warn!(
                target: "zai_proxy::request",
                model = %self.model,
                stream = self.stream,
                "upstream returned no content"
            );
        }
        log_request_complete(
            &self.model,
            self.stream,
            self.content_chars,
            self.reasoning_chars,
            self.started,
        );
    }
}
