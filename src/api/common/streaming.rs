use std::convert::Infallible;
use std::pin::Pin;

use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::CompletionLog;
use crate::protocol::openai_chat::stream::ChunkEncoder;
use crate::stream::sse::{upstream_line_stream, DONE_FRAME};
use crate::transcode::{DispatchFlow, EventDispatcher, FragmentKind, Fragments};

#[inline]
fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// Answer with an SSE body fed by the upstream response.
pub(crate) fn stream_chat_response(
    upstream: reqwest::Response,
    encoder: ChunkEncoder,
    log: CompletionLog,
) -> Response {
    let lines = upstream_line_stream(upstream.bytes_stream());
    let frames = emit_stream(lines, encoder, log);
    sse_ok_response(axum::body::Body::from_stream(
        frames.map(Ok::<Bytes, Infallible>),
    ))
}

struct StreamEmitter<S> {
    lines: Pin<Box<S>>,
    dispatcher: EventDispatcher,
    encoder: ChunkEncoder,
    fragments: Fragments,
    log: CompletionLog,
    done: bool,
}

impl<S> StreamEmitter<S>
where
    S: Stream<Item = String> + Send,
{
    fn encode_pending(&mut self, out: &mut String) {
        for fragment in self.fragments.drain(..) {
            match fragment.kind {
                FragmentKind::Content => self.log.content_chars += fragment.text.chars().count(),
                FragmentKind::Reasoning => {
                    self.log.reasoning_chars += fragment.text.chars().count();
                }
            }
            if let Some(frame) = self.encoder.encode_fragment(&fragment) {
                out.push_str(&frame);
            }
        }
    }

    /// Next non-empty batch of frames for the client.
    async fn next_frames(&mut self) -> Option<Bytes> {
        if self.done {
            return None;
        }
        let mut out = String::new();
        while let Some(line) = self.lines.next().await {
            let flow = self.dispatcher.dispatch_line(&line, &mut self.fragments);
            self.encode_pending(&mut out);
            if flow == DispatchFlow::Stop {
                break;
            }
            if !out.is_empty() {
                return Some(Bytes::from(out));
            }
        }

        let reason = self.dispatcher.finish(&mut self.fragments);
        self.encode_pending(&mut out);
        out.push_str(&self.encoder.encode_finish(reason));
        out.push_str(DONE_FRAME);
        self.done = true;
        self.log.finish();
        Some(Bytes::from(out))
    }
}

/// Transcode a line stream into `chat.completion.chunk` SSE frames.
///
/// Frames produced by one upstream line are written together. The stream
/// always ends with the finish chunk and `data: [DONE]`, also when the
/// upstream stops early.
pub(crate) fn emit_stream<S>(
    lines: S,
    encoder: ChunkEncoder,
    log: CompletionLog,
) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = String> + Send + 'static,
{
    let emitter = StreamEmitter {
        lines: Box::pin(lines),
        dispatcher: EventDispatcher::new(),
        encoder,
        fragments: Fragments::new(),
        log,
        done: false,
    };
    futures_util::stream::unfold(emitter, |mut emitter| async move {
        let frames = emitter.next_frames().await?;
        Some((frames, emitter))
    })
}
