//! Reasoning text cleanup.
//!
//! Upstream renders chain-of-thought as a Markdown blockquote: the first
//! delta opens with `"> "` and every following line starts with `"\n> "`.
//! Deltas may split those prefixes anywhere, so a short suffix is carried
//! to the next call until it can be classified.

use super::event::Phase;

const OPEN_MARKER: &str = "> ";
const LINE_PREFIX: &str = "\n> ";
const CLOSE_MARKER: &str = "\n</details>";

/// Request-scoped reasoning filter.
#[derive(Debug, Default)]
pub struct ThinkingFilter {
    seen_first_marker: bool,
    /// Text received before the opening marker of the current round.
    preamble: String,
    carry: String,
    last_emitted_chunk: String,
    last_phase: Option<Phase>,
    round_count: u32,
}

impl ThinkingFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clean one reasoning delta and return the text that is safe to emit.
    pub fn process_incremental(&mut self, delta: &str) -> String {
        let mut content = std::mem::take(&mut self.carry);
        if self.seen_first_marker {
            content.push_str(delta);
        } else {
            self.preamble.push_str(delta);
            let Some(at) = self.preamble.find(OPEN_MARKER) else {
                self.carry = content;
                return String::new();
            };
            content.push_str(&self.preamble[at + OPEN_MARKER.len()..]);
            self.preamble.clear();
            self.seen_first_marker = true;
        }

        let mut content = strip_line_prefixes(&content);
        if content.ends_with("\n>") {
            content.truncate(content.len() - 2);
            self.carry.push_str("\n>");
        } else if content.ends_with('\n') {
            content.truncate(content.len() - 1);
            self.carry.push('\n');
        }
        content
    }

    /// Release whatever is being held back. Idempotent.
    ///
    /// A round whose opening marker never arrived releases its raw text.
    pub fn flush(&mut self) -> String {
        if self.seen_first_marker {
            std::mem::take(&mut self.carry)
        } else {
            std::mem::take(&mut self.preamble)
        }
    }

    /// Reasoning in `snapshot` beyond what was emitted for this round.
    ///
    /// The first occurrence of the last emitted chunk is taken as the resume
    /// point. When it cannot be found the whole reasoning text is returned
    /// again.
    #[must_use]
    pub fn extract_incremental(&self, snapshot: &str) -> String {
        let complete = extract_complete(snapshot);
        if complete.is_empty() || self.last_emitted_chunk.is_empty() {
            return complete;
        }
        match complete.find(self.last_emitted_chunk.as_str()) {
            Some(at) => complete[at + self.last_emitted_chunk.len()..].to_owned(),
            None => complete,
        }
    }

    pub fn record_emitted(&mut self, chunk: &str) {
        chunk.clone_into(&mut self.last_emitted_chunk);
    }

    pub fn reset_round(&mut self) {
        self.last_emitted_chunk.clear();
        self.seen_first_marker = false;
        self.preamble.clear();
    }

    /// Note a reasoning delta. Returns `true` when it opens a round after
    /// the first one, in which case the round has already been reset.
    pub fn enter_thinking(&mut self) -> bool {
        let entering = self.last_phase != Some(Phase::Thinking);
        self.last_phase = Some(Phase::Thinking);
        if !entering {
            return false;
        }
        self.round_count += 1;
        if self.round_count > 1 {
            self.reset_round();
            return true;
        }
        false
    }

    /// Remember a non-reasoning phase so the next reasoning delta opens a
    /// new round.
    pub fn note_phase(&mut self, phase: Phase) {
        self.last_phase = Some(phase);
    }

    #[must_use]
    pub fn round_count(&self) -> u32 {
        self.round_count
    }
}

/// De-prefixed reasoning text of a `<details>` block inside a snapshot.
///
/// Empty when either the opening marker or the closing `</details>` is
/// missing.
#[must_use]
pub fn extract_complete(snapshot: &str) -> String {
    let Some(open) = snapshot.find(OPEN_MARKER) else {
        return String::new();
    };
    let start = open + OPEN_MARKER.len();
    let Some(len) = snapshot[start..].find(CLOSE_MARKER) else {
        return String::new();
    };
    strip_line_prefixes(&snapshot[start..start + len])
}

/// Offset just past the closing `</details>` marker, if present.
#[must_use]
pub fn find_close_marker_end(snapshot: &str) -> Option<usize> {
    const DETAILS_CLOSE: &str = "</details>";
    snapshot
        .find(DETAILS_CLOSE)
        .map(|at| at + DETAILS_CLOSE.len())
}

#[inline]
fn strip_line_prefixes(text: &str) -> String {
    text.replace(LINE_PREFIX, "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_whole(input: &str) -> String {
        let mut filter = ThinkingFilter::new();
        let mut out = filter.process_incremental(input);
        out.push_str(&filter.flush());
        out
    }

    #[test]
    fn strips_opening_marker_and_line_prefixes() {
        let mut filter = ThinkingFilter::new();
        assert_eq!(filter.process_incremental("> Hello"), "Hello");
        assert_eq!(filter.process_incremental(" world\n> more"), " world\nmore");
        assert_eq!(filter.flush(), "");
    }

    #[test]
    fn trailing_newline_is_carried() {
        let mut filter = ThinkingFilter::new();
        assert_eq!(filter.process_incremental("> line one\n"), "line one");
        assert_eq!(filter.process_incremental("> line two\n>"), "\nline two");
        assert_eq!(filter.flush(), "\n>");
        assert_eq!(filter.flush(), "");
    }

    #[test]
    fn waits_for_opening_marker() {
        let mut filter = ThinkingFilter::new();
        assert_eq!(filter.process_incremental(">"), "");
        assert_eq!(filter.process_incremental(" Hi"), "Hi");
    }

    #[test]
    fn split_at_every_offset_matches_whole() {
        let inputs = [
            "> Hello world\n> second line\n> \n> third",
            "<details>\n> a\n\n> b\n>\n> c\n",
            "> ünïcødé\n> 思考中\n> done",
            "no marker at all\n> but later",
            "never quoted, just prose\nacross lines",
        ];
        for input in inputs {
            let whole = run_whole(input);
            for split in 0..=input.len() {
                if !input.is_char_boundary(split) {
                    continue;
                }
                let mut filter = ThinkingFilter::new();
                let mut out = filter.process_incremental(&input[..split]);
                out.push_str(&filter.process_incremental(&input[split..]));
                out.push_str(&filter.flush());
                assert_eq!(out, whole, "split at {split} of {input:?}");
            }
        }
    }

    #[test]
    fn extract_complete_requires_both_markers() {
        let snapshot = "<details type=\"reasoning\">\n> first\n> second\n</details>\nAnswer";
        assert_eq!(extract_complete(snapshot), "first\nsecond");
        assert_eq!(extract_complete("> open only"), "");
        assert_eq!(extract_complete("no open\n</details>"), "");
    }

    #[test]
    fn extract_incremental_returns_unsent_suffix() {
        let mut filter = ThinkingFilter::new();
        let snapshot = "<details>\n> Hello world\n> more text\n</details>\n";
        assert_eq!(filter.extract_incremental(snapshot), "Hello world\nmore text");

        filter.record_emitted(" world\nmore");
        assert_eq!(filter.extract_incremental(snapshot), " text");

        filter.record_emitted("diverged");
        assert_eq!(filter.extract_incremental(snapshot), "Hello world\nmore text");
    }

    #[test]
    fn repeated_chunk_resumes_at_first_occurrence() {
        let mut filter = ThinkingFilter::new();
        filter.record_emitted(" the");
        let snapshot = "<details>\n> I think the answer is the best one\n</details>\nHi";
        assert_eq!(filter.extract_incremental(snapshot), " answer is the best one");
    }

    #[test]
    fn unmarked_round_is_released_by_flush() {
        let mut filter = ThinkingFilter::new();
        assert_eq!(filter.process_incremental("plain reasoning"), "");
        assert_eq!(filter.flush(), "plain reasoning");
        assert_eq!(filter.flush(), "");

        let mut marked = ThinkingFilter::new();
        assert_eq!(marked.process_incremental("<details>\n> hi"), "hi");
        assert_eq!(marked.flush(), "");
    }

    #[test]
    fn rounds_reset_after_the_first() {
        let mut filter = ThinkingFilter::new();
        assert!(!filter.enter_thinking());
        assert_eq!(filter.process_incremental("> one"), "one");
        filter.record_emitted("one");
        assert!(!filter.enter_thinking());

        filter.note_phase(Phase::Answer);
        assert!(filter.enter_thinking());
        assert_eq!(filter.round_count(), 2);
        assert_eq!(filter.process_incremental("> two"), "two");
        assert_eq!(
            filter.extract_incremental("> two\n</details>"),
            "two",
            "last emitted chunk is cleared by the reset"
        );
    }

    #[test]
    fn close_marker_end_offset() {
        let snapshot = "x</details>\nrest";
        let end = find_close_marker_end(snapshot).unwrap();
        assert_eq!(&snapshot[end..], "\nrest");
        assert!(find_close_marker_end("none").is_none());
    }
}
