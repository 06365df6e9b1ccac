use smallvec::SmallVec;

use super::event::{Phase, UpstreamEvent};
use super::extract::{
    format_image_search_results, is_image_search_content, is_mcp_content,
    is_search_result_content, is_search_tool_call, parse_image_search_results,
    parse_search_results, text_before_glm_block,
};
use super::search_ref::SearchRefFilter;
use super::thinking::{find_close_marker_end, ThinkingFilter};
use super::{FinishReason, FragmentKind, OutputFragment};
use crate::stream::sse::{parse_upstream_line, LineEvent};

const ROUND_SEPARATOR: &str = "\n\n";

pub type Fragments = SmallVec<[OutputFragment; 4]>;

/// Whether more upstream events should be fed to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchFlow {
    Continue,
    Stop,
}

/// Per-request state machine turning upstream events into fragments.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    thinking: ThinkingFilter,
    refs: SearchRefFilter,
    pending_citations: String,
    pending_images: String,
    /// Characters of answer text already emitted, for snapshot diffing.
    answer_chars: usize,
    saw_thinking: bool,
    separator_pending: bool,
    stopped: bool,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one raw upstream line and dispatch it.
    ///
    /// Lines that do not decode are skipped; `data: [DONE]` stops dispatch.
    pub fn dispatch_line(&mut self, line: &str, out: &mut Fragments) -> DispatchFlow {
        match parse_upstream_line(line) {
            LineEvent::Event(event) => self.dispatch(&event, out),
            LineEvent::Done => {
                self.stopped = true;
                DispatchFlow::Stop
            }
            LineEvent::Skip => self.flow(),
        }
    }

    pub fn dispatch(&mut self, event: &UpstreamEvent, out: &mut Fragments) -> DispatchFlow {
        if self.stopped {
            return DispatchFlow::Stop;
        }
        if event.is_phase(Phase::Done) {
            self.stopped = true;
            return DispatchFlow::Stop;
        }

        if event.is_phase(Phase::Thinking) && !event.delta_content.is_empty() {
            self.on_thinking_delta(&event.delta_content, out);
            return self.after(event);
        }
        if let Some(phase) = event.phase {
            self.thinking.note_phase(phase);
        }

        let edit = event.edit_content.as_str();
        if !edit.is_empty() {
            if is_search_result_content(edit) {
                let results = parse_search_results(edit);
                if !results.is_empty() {
                    tracing::debug!(
                        target: "zai_proxy::transcode",
                        count = results.len(),
                        "registered search results"
                    );
                    self.refs.register_results(results);
                    self.pending_citations = self.refs.render_citation_list();
                }
                return self.after(event);
            }
            if is_image_search_content(edit) {
                self.emit_text_before_block(edit, out);
                let images = parse_image_search_results(edit);
                if !images.is_empty() {
                    self.pending_images = format_image_search_results(&images);
                }
                return self.after(event);
            }
            if is_mcp_content(edit) {
                self.emit_text_before_block(edit, out);
                return self.after(event);
            }
        }
        if is_search_tool_call(edit, event.is_phase(Phase::ToolCall)) {
            return self.after(event);
        }

        if !self.saw_thinking && !self.pending_citations.is_empty() {
            let citations = std::mem::take(&mut self.pending_citations);
            push(out, FragmentKind::Content, citations);
        }
        if !self.pending_images.is_empty() {
            let images = std::mem::take(&mut self.pending_images);
            push(out, FragmentKind::Content, images);
        }

        let carried = self.thinking.flush();
        let mut reasoning_tail = self.refs.process(FragmentKind::Reasoning, &carried);
        reasoning_tail.push_str(&self.refs.flush(FragmentKind::Reasoning));
        self.push_reasoning(out, reasoning_tail);

        if !self.pending_citations.is_empty() {
            let citations = std::mem::take(&mut self.pending_citations);
            self.push_reasoning(out, citations);
        }

        let mut reasoning = String::new();
        let mut content = String::new();
        let mut answer_delta = false;
        match event.phase {
            Some(Phase::Answer) if !event.delta_content.is_empty() => {
                content.clone_from(&event.delta_content);
                answer_delta = true;
            }
            Some(Phase::Answer) if !edit.is_empty() => {
                if let Some(close_end) = find_close_marker_end(edit) {
                    reasoning = self.thinking.extract_incremental(edit);
                    if !reasoning.is_empty() {
                        self.thinking.record_emitted(&reasoning);
                    }
                    let after = &edit[close_end..];
                    after.strip_prefix('\n').unwrap_or(after).clone_into(&mut content);
                    self.answer_chars = content.chars().count();
                }
            }
            Some(Phase::Other | Phase::ToolCall) if !edit.is_empty() => {
                let total = edit.chars().count();
                if total > self.answer_chars {
                    let start = edit
                        .char_indices()
                        .nth(self.answer_chars)
                        .map_or(edit.len(), |(at, _)| at);
                    edit[start..].clone_into(&mut content);
                    self.answer_chars = total;
                } else {
                    edit.clone_into(&mut content);
                }
            }
            _ => {}
        }

        if !reasoning.is_empty() {
            let mut text = self.refs.process(FragmentKind::Reasoning, &reasoning);
            text.push_str(&self.refs.flush(FragmentKind::Reasoning));
            self.push_reasoning(out, text);
        }
        if !content.is_empty() {
            let text = self.refs.process(FragmentKind::Content, &content);
            if answer_delta {
                self.answer_chars += text.chars().count();
            }
            push(out, FragmentKind::Content, text);
        }

        self.after(event)
    }

    /// Release held-back text. Call once after the last event.
    pub fn finish(&mut self, out: &mut Fragments) -> FinishReason {
        let carried = self.thinking.flush();
        let mut reasoning = self.refs.process(FragmentKind::Reasoning, &carried);
        reasoning.push_str(&self.refs.flush(FragmentKind::Reasoning));
        self.push_reasoning(out, reasoning);
        push(out, FragmentKind::Content, self.refs.flush(FragmentKind::Content));
        self.stopped = true;
        FinishReason::Stop
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn on_thinking_delta(&mut self, delta: &str, out: &mut Fragments) {
        self.saw_thinking = true;
        if self.thinking.enter_thinking() {
            self.separator_pending = true;
        }
        let cleaned = self.thinking.process_incremental(delta);
        if cleaned.is_empty() {
            return;
        }
        self.thinking.record_emitted(&cleaned);
        let text = self.refs.process(FragmentKind::Reasoning, &cleaned);
        self.push_reasoning(out, text);
    }

    fn emit_text_before_block(&mut self, edit: &str, out: &mut Fragments) {
        let before = text_before_glm_block(edit);
        if before.is_empty() {
            return;
        }
        let text = self.refs.process(FragmentKind::Content, before);
        push(out, FragmentKind::Content, text);
    }

    fn push_reasoning(&mut self, out: &mut Fragments, mut text: String) {
        if text.is_empty() {
            return;
        }
        if self.separator_pending {
            text.insert_str(0, ROUND_SEPARATOR);
            self.separator_pending = false;
        }
        push(out, FragmentKind::Reasoning, text);
    }

    #[inline]
    fn after(&mut self, event: &UpstreamEvent) -> DispatchFlow {
        if event.done {
            self.stopped = true;
        }
        self.flow()
    }

    #[inline]
    fn flow(&self) -> DispatchFlow {
        if self.stopped {
            DispatchFlow::Stop
        } else {
            DispatchFlow::Continue
        }
    }
}

#[inline]
fn push(out: &mut Fragments, kind: FragmentKind, text: String) {
    if !text.is_empty() {
        out.push(OutputFragment { kind, text });
    }
}

/// Concatenated result of a whole upstream transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscodedMessage {
    pub content: String,
    pub reasoning: String,
}

impl TranscodedMessage {
    pub fn absorb(&mut self, fragments: &mut Fragments) {
        for fragment in fragments.drain(..) {
            match fragment.kind {
                FragmentKind::Content => self.content.push_str(&fragment.text),
                FragmentKind::Reasoning => self.reasoning.push_str(&fragment.text),
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_empty()
    }
}

/// Run a complete transcript through a fresh dispatcher.
pub fn transcode_lines<'a, I>(lines: I) -> TranscodedMessage
where
    I: IntoIterator<Item = &'a str>,
{
    let mut dispatcher = EventDispatcher::new();
    let mut fragments = Fragments::new();
    let mut message = TranscodedMessage::default();
    for line in lines {
        let flow = dispatcher.dispatch_line(line, &mut fragments);
        message.absorb(&mut fragments);
        if flow == DispatchFlow::Stop {
            break;
        }
    }
    dispatcher.finish(&mut fragments);
    message.absorb(&mut fragments);
    message
}
