use axum::response::Response;
use bytes::Bytes;

use super::CompletionLog;
use crate::error::ProxyError;
use crate::protocol::openai_chat::OpenAiChatResponse;
use crate::stream::sse::UpstreamLineDecoder;
use crate::transcode::{transcode_lines, TranscodedMessage};

/// Bodies shorter than this that are neither SSE nor a completion document
/// are passed through as the answer text.
const RAW_BODY_MAX_CHARS: usize = 2000;

#[inline]
fn ok_json_response(body_bytes: Bytes) -> Response {
    let mut response = Response::new(axum::body::Body::from(body_bytes));
    *response.status_mut() = http::StatusCode::OK;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

/// Whether a buffered body is a line-delimited event stream.
fn looks_like_event_stream(body: &[u8]) -> bool {
    let trimmed = body.trim_ascii_start();
    trimmed.starts_with(b"data:") || memchr::memmem::find(body, b"\ndata:").is_some()
}

/// Reduce a complete upstream body to one message.
///
/// Event streams run through the same dispatcher as the streaming path. A
/// `chat.completion` document contributes its first choice. Anything else
/// short enough is taken verbatim as content.
#[must_use]
pub fn aggregate_body(body: &[u8]) -> TranscodedMessage {
    if looks_like_event_stream(body) {
        let mut decoder = UpstreamLineDecoder::new();
        let mut lines = Vec::new();
        decoder.feed(body, &mut lines);
        decoder.finish(&mut lines);
        return transcode_lines(lines.iter().map(String::as_str));
    }

    if let Ok(document) = serde_json::from_slice::<OpenAiChatResponse>(body) {
        if let Some((content, reasoning)) = document.first_message_text() {
            return TranscodedMessage { content, reasoning };
        }
    }

    let text = String::from_utf8_lossy(body);
    if !text.trim().is_empty() && text.chars().count() < RAW_BODY_MAX_CHARS {
        return TranscodedMessage {
            content: text.into_owned(),
            reasoning: String::new(),
        };
    }
    TranscodedMessage::default()
}

/// Identity of the response document.
pub(crate) struct AggregateContext {
    pub id: String,
    pub model: String,
    pub created: u64,
}

/// Read the whole upstream body and answer with one `chat.completion`.
pub(crate) async fn aggregate_chat_response(
    upstream: reqwest::Response,
    ctx: AggregateContext,
    mut log: CompletionLog,
) -> Result<Response, ProxyError> {
    let body = upstream.bytes().await.map_err(|err| {
        tracing::error!(target: "zai_proxy::upstream", "failed to read upstream body: {err}");
        ProxyError::Transport(format!("failed to read upstream body: {err}"))
    })?;

    let message = aggregate_body(&body);
    log.content_chars = message.content.chars().count();
    log.reasoning_chars = message.reasoning.chars().count();
    log.finish();

    let document = OpenAiChatResponse::assistant(
        ctx.id,
        ctx.model,
        ctx.created,
        message.content,
        message.reasoning,
    );
    let bytes = serde_json::to_vec(&document)
        .map_err(|err| ProxyError::Internal(format!("failed to encode response: {err}")))?;
    Ok(ok_json_response(Bytes::from(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_stream_body() {
        let body = concat!(
            "data: {\"data\":{\"phase\":\"thinking\",\"delta_content\":\"> Hello\"}}\r\n",
            "data: {\"data\":{\"phase\":\"thinking\",\"delta_content\":\" world\\n> more\"}}\r\n",
            "\r\n",
            "data: {\"data\":{\"phase\":\"answer\",\"delta_content\":\"Done.\"}}\n",
            "data: {\"data\":{\"phase\":\"done\",\"done\":true}}\n",
        );
        let message = aggregate_body(body.as_bytes());
        assert_eq!(message.reasoning, "Hello world\nmore");
        assert_eq!(message.content, "Done.");
    }

    #[test]
    fn test_completion_document_body() {
        let body = br#"{"id":"x","object":"chat.completion","choices":[{"index":0,"message":{"role":"assistant","content":"hi","reasoning_content":"because"},"finish_reason":"stop"}]}"#;
        let message = aggregate_body(body);
        assert_eq!(message.content, "hi");
        assert_eq!(message.reasoning, "because");
    }

    #[test]
    fn test_raw_and_oversized_bodies() {
        assert_eq!(aggregate_body(b"plain answer").content, "plain answer");
        assert!(aggregate_body(b"").is_empty());
        assert!(aggregate_body(b"{\"choices\":[]}").content.starts_with('{'));
        let big = "x".repeat(RAW_BODY_MAX_CHARS);
        assert!(aggregate_body(big.as_bytes()).is_empty());
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let body = concat!(
            "data: {\"data\":{\"phase\":\"answer\",\"delta_content\":\"see [ref_1]\"}}\n",
            "data: {\"data\":{\"phase\":\"answer\",\"delta_content\":\" end\"}}\n",
        );
        assert_eq!(aggregate_body(body.as_bytes()), aggregate_body(body.as_bytes()));
    }
}
