/// Line-level decoding of the upstream event stream and OpenAI SSE encoding.
///
/// The upstream writes one `data: {json}` record per line. Bytes arrive in
/// arbitrary chunks, so complete lines are assembled here before any JSON
/// decoding happens, including UTF-8 sequences split across chunks.
use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;

use crate::transcode::UpstreamEvent;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Classification of one upstream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Event(UpstreamEvent),
    Done,
    Skip,
}

/// Decode one upstream line.
///
/// Blank lines, comments, non-`data` fields and undecodable payloads are
/// skipped.
#[must_use]
pub fn parse_upstream_line(line: &str) -> LineEvent {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(payload) = line.strip_prefix("data:") else {
        return LineEvent::Skip;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return LineEvent::Skip;
    }
    if payload == "[DONE]" {
        return LineEvent::Done;
    }
    match UpstreamEvent::from_json(payload) {
        Some(event) => LineEvent::Event(event),
        None => {
            tracing::debug!(target: "zai_proxy::upstream", "skipping undecodable line");
            LineEvent::Skip
        }
    }
}

/// Incremental byte-to-line splitter.
#[derive(Debug, Default)]
pub struct UpstreamLineDecoder {
    buffer: String,
    utf8_remainder: Vec<u8>,
}

impl UpstreamLineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and append every completed line (without terminator).
    pub fn feed(&mut self, chunk: &[u8], lines: &mut Vec<String>) {
        let scan_from = self.buffer.len();
        self.push_utf8(chunk);

        let mut consumed = 0usize;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_from..]) {
            let line_end = scan_from + rel_pos;
            let line = &self.buffer[consumed..line_end];
            lines.push(line.strip_suffix('\r').unwrap_or(line).to_owned());
            consumed = line_end + 1;
        }
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
    }

    /// Emit the trailing unterminated line, if any.
    pub fn finish(&mut self, lines: &mut Vec<String>) {
        if !self.utf8_remainder.is_empty() {
            self.buffer.push(char::REPLACEMENT_CHARACTER);
            self.utf8_remainder.clear();
        }
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
    }

    fn push_utf8(&mut self, chunk: &[u8]) {
        if self.utf8_remainder.is_empty() {
            if let Ok(text) = std::str::from_utf8(chunk) {
                self.buffer.push_str(text);
                return;
            }
        }

        self.utf8_remainder.extend_from_slice(chunk);
        let mut start = 0usize;
        loop {
            match std::str::from_utf8(&self.utf8_remainder[start..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.utf8_remainder.clear();
                    return;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.utf8_remainder[start..valid_end]) {
                        self.buffer.push_str(text);
                    }
                    match err.error_len() {
                        Some(invalid_len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + invalid_len;
                        }
                        None => {
                            self.utf8_remainder.drain(..valid_end);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Split an HTTP body stream into upstream lines.
///
/// A transport error ends the stream after the lines already received;
/// there is no retry.
pub fn upstream_line_stream<S, E>(byte_stream: S) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            UpstreamLineDecoder::new(),
            Vec::<String>::with_capacity(8),
            VecDeque::<String>::with_capacity(8),
            false,
        ),
        |(mut stream, mut decoder, mut batch, mut pending, mut exhausted)| async move {
            loop {
                if let Some(line) = pending.pop_front() {
                    return Some((line, (stream, decoder, batch, pending, exhausted)));
                }
                if exhausted {
                    return None;
                }
                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => decoder.feed(&bytes, &mut batch),
                    Some(Err(err)) => {
                        tracing::warn!(
                            target: "zai_proxy::upstream",
                            "upstream stream interrupted: {err}"
                        );
                        decoder.finish(&mut batch);
                        exhausted = true;
                    }
                    None => {
                        decoder.finish(&mut batch);
                        exhausted = true;
                    }
                }
                pending.extend(batch.drain(..));
            }
        },
    )
}
