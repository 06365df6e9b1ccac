//! Inline citation rewriting.
//!
//! Search-backed answers carry markers such as `[ref_3]`. Each one becomes
//! a Markdown link to the registered result, or disappears when the id is
//! unknown. Text that may be the beginning of a marker is held back until
//! the next call, separately for answer and reasoning text.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex_lite::{Captures, Regex};
use rustc_hash::FxHashMap;

use super::extract::{escape_markdown_label, SearchResult};
use super::FragmentKind;

const MARKER_ID_PREFIX: &[u8] = b"ref_";
/// `[ref_` plus up to ten digits and `]`. Longer ids are not markers.
const MAX_MARKER_LEN: usize = 16;

static REF_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(ref_\d{1,10})\]").ok());

/// Request-scoped citation registry and marker rewriter.
#[derive(Debug, Default)]
pub struct SearchRefFilter {
    registry: FxHashMap<String, SearchResult>,
    carries: [String; 2],
}

impl SearchRefFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite results by `ref_id`.
    pub fn register_results(&mut self, results: impl IntoIterator<Item = SearchResult>) {
        for result in results {
            self.registry.insert(result.ref_id.clone(), result);
        }
    }

    /// Rewrite markers in `text`, holding back a trailing partial marker.
    pub fn process(&mut self, channel: FragmentKind, text: &str) -> String {
        let Self { registry, carries } = self;
        let carry = &mut carries[channel_slot(channel)];
        carry.push_str(text);
        let hold_from = partial_marker_start(carry);
        let out = rewrite_markers(registry, &carry[..hold_from]);
        carry.drain(..hold_from);
        out
    }

    /// Rewrite and release everything held for `channel`.
    pub fn flush(&mut self, channel: FragmentKind) -> String {
        let carry = std::mem::take(&mut self.carries[channel_slot(channel)]);
        if carry.is_empty() {
            return carry;
        }
        rewrite_markers(&self.registry, &carry)
    }

    /// One Markdown link per registered result ordered by index, then a
    /// blank line. Empty when nothing is registered.
    #[must_use]
    pub fn render_citation_list(&self) -> String {
        if self.registry.is_empty() {
            return String::new();
        }
        let mut results: Vec<&SearchResult> = self.registry.values().collect();
        results.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.ref_id.cmp(&b.ref_id)));

        let mut out = String::new();
        for result in results {
            let _ = write!(out, "[\\[{}\\] ", result.index);
            escape_markdown_label(&mut out, &result.title);
            out.push_str("](");
            out.push_str(&result.url);
            out.push_str(")\n");
        }
        out.push('\n');
        out
    }
}

#[inline]
fn channel_slot(channel: FragmentKind) -> usize {
    match channel {
        FragmentKind::Content => 0,
        FragmentKind::Reasoning => 1,
    }
}

fn rewrite_markers(registry: &FxHashMap<String, SearchResult>, text: &str) -> String {
    let Some(marker) = REF_MARKER.as_ref() else {
        return text.to_owned();
    };
    if memchr::memchr(b'[', text.as_bytes()).is_none() {
        return text.to_owned();
    }
    marker
        .replace_all(text, |caps: &Captures<'_>| match registry.get(&caps[1]) {
            Some(result) => format!("[\\[{}\\]]({})", result.index, result.url),
            None => String::new(),
        })
        .into_owned()
}

/// Start of a trailing substring that could still grow into a marker, or
/// `text.len()` when nothing needs holding back.
fn partial_marker_start(text: &str) -> usize {
    let bytes = text.as_bytes();
    let Some(open) = memchr::memrchr(b'[', bytes) else {
        return bytes.len();
    };
    let tail = &bytes[open + 1..];
    // Everything but the closing `]` must still fit.
    if tail.len() + 2 > MAX_MARKER_LEN {
        return bytes.len();
    }
    let prefix_len = tail.len().min(MARKER_ID_PREFIX.len());
    let is_partial = tail[..prefix_len] == MARKER_ID_PREFIX[..prefix_len]
        && tail[prefix_len..].iter().all(u8::is_ascii_digit);
    if is_partial {
        open
    } else {
        bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(ref_id: &str, index: i64, title: &str, url: &str) -> SearchResult {
        SearchResult {
            title: title.into(),
            url: url.into(),
            index,
            ref_id: ref_id.into(),
        }
    }

    fn filter_with_refs() -> SearchRefFilter {
        let mut filter = SearchRefFilter::new();
        filter.register_results([
            result("ref_1", 1, "One", "https://one.example"),
            result("ref_2", 2, "Two", "https://two.example"),
        ]);
        filter
    }

    #[test]
    fn rewrites_known_and_drops_unknown_markers() {
        let mut filter = filter_with_refs();
        let out = filter.process(FragmentKind::Content, "See [ref_1] and [ref_9] or [ref_2].");
        assert_eq!(
            out,
            "See [\\[1\\]](https://one.example) and  or [\\[2\\]](https://two.example)."
        );
        assert_eq!(filter.flush(FragmentKind::Content), "");
    }

    #[test]
    fn holds_back_partial_marker() {
        let mut filter = filter_with_refs();
        assert_eq!(filter.process(FragmentKind::Content, "text [ref_"), "text ");
        assert_eq!(
            filter.process(FragmentKind::Content, "1] end"),
            "[\\[1\\]](https://one.example) end"
        );
    }

    #[test]
    fn non_marker_brackets_pass_through() {
        let mut filter = filter_with_refs();
        assert_eq!(filter.process(FragmentKind::Content, "[x] [ref_a"), "[x] [ref_a");
        assert_eq!(filter.process(FragmentKind::Content, "a [1"), "a [1");
    }

    #[test]
    fn channels_do_not_share_carry() {
        let mut filter = filter_with_refs();
        assert_eq!(filter.process(FragmentKind::Reasoning, "think [re"), "think ");
        assert_eq!(filter.process(FragmentKind::Content, "answer"), "answer");
        assert_eq!(filter.flush(FragmentKind::Content), "");
        assert_eq!(filter.flush(FragmentKind::Reasoning), "[re");
    }

    #[test]
    fn arbitrary_splits_match_whole() {
        let input = "A [ref_1] B [ref_12] C [ref_2][ref_1]] [[ref_2] tail [ref_";
        let mut whole_filter = filter_with_refs();
        let mut whole = whole_filter.process(FragmentKind::Content, input);
        whole.push_str(&whole_filter.flush(FragmentKind::Content));

        for step in 1..=7 {
            let mut filter = filter_with_refs();
            let mut out = String::new();
            let mut start = 0;
            while start < input.len() {
                let end = (start + step).min(input.len());
                out.push_str(&filter.process(FragmentKind::Content, &input[start..end]));
                start = end;
            }
            out.push_str(&filter.flush(FragmentKind::Content));
            assert_eq!(out, whole, "step {step}");
        }
        for split in 0..=input.len() {
            let mut filter = filter_with_refs();
            let mut out = filter.process(FragmentKind::Content, &input[..split]);
            out.push_str(&filter.process(FragmentKind::Content, &input[split..]));
            out.push_str(&filter.flush(FragmentKind::Content));
            assert_eq!(out, whole, "split at {split}");
        }
    }

    #[test]
    fn marker_digit_cap_is_split_independent() {
        let mut filter = SearchRefFilter::new();
        filter.register_results([
            result("ref_1234567890", 7, "Ten", "https://ten"),
            result("ref_123456789012", 8, "Twelve", "https://twelve"),
        ]);
        let ten = "x [ref_1234567890]";
        let twelve = "y [ref_123456789012]";

        for input in [ten, twelve] {
            let mut whole = filter.process(FragmentKind::Content, input);
            whole.push_str(&filter.flush(FragmentKind::Content));
            let cut = input.len() - 1;
            let mut split = filter.process(FragmentKind::Content, &input[..cut]);
            split.push_str(&filter.process(FragmentKind::Content, &input[cut..]));
            split.push_str(&filter.flush(FragmentKind::Content));
            assert_eq!(split, whole, "{input}");
        }

        let mut out = filter.process(FragmentKind::Content, ten);
        out.push_str(&filter.flush(FragmentKind::Content));
        assert_eq!(out, "x [\\[7\\]](https://ten)");
        let mut out = filter.process(FragmentKind::Content, twelve);
        out.push_str(&filter.flush(FragmentKind::Content));
        assert_eq!(out, twelve);
    }

    #[test]
    fn citation_list_is_sorted_and_escaped() {
        let mut filter = SearchRefFilter::new();
        filter.register_results([
            result("ref_3", 3, "Third", "https://c"),
            result("ref_1", 1, "A [b] \\ c", "https://a"),
            result("ref_2", 2, "Second", "https://b"),
        ]);
        assert_eq!(
            filter.render_citation_list(),
            "[\\[1\\] A \\[b\\] \\\\ c](https://a)\n\
             [\\[2\\] Second](https://b)\n\
             [\\[3\\] Third](https://c)\n\n"
        );
        assert_eq!(SearchRefFilter::new().render_citation_list(), "");
    }

    #[test]
    fn register_overwrites_by_ref_id() {
        let mut filter = SearchRefFilter::new();
        filter.register_results([result("ref_1", 1, "Old", "https://old")]);
        filter.register_results([result("ref_1", 1, "New", "https://new")]);
        assert_eq!(filter.render_citation_list(), "[\\[1\\] New](https://new)\n\n");
    }
}
