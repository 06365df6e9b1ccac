//! Bracket-depth scanning for JSON fragments embedded in free text.
//!
//! Upstream snapshots mix prose, HTML-ish blocks and JSON payloads, so they
//! are never parsed as a whole. These scanners only locate the span of one
//! array value; decoding the span is left to `serde_json`.

use memchr::memmem;

/// Which delimiters count towards nesting depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketScan {
    /// Only `[` and `]`.
    Arrays,
    /// `[`/`]` and `{`/`}`. The span still ends at a `]`.
    ArraysAndObjects,
}

/// Return the balanced array value following the first occurrence of `key`.
///
/// Quoted strings are opaque: delimiters inside them never change the depth,
/// and a backslash escapes the following byte. Returns `None` when the key
/// is missing, no `[` follows it, or the brackets never balance.
#[must_use]
pub fn extract_bracketed<'a>(text: &'a str, key: &str, scan: BracketScan) -> Option<&'a str> {
    let bytes = text.as_bytes();
    let after_key = memmem::find(bytes, key.as_bytes())? + key.len();
    let open = after_key + memchr::memchr(b'[', &bytes[after_key..])?;
    let end = balanced_end(bytes, open, scan)?;
    Some(&text[open..end])
}

/// Prefix of `text` before the first `marker`, minus one trailing newline.
///
/// Empty when the marker does not occur.
#[must_use]
pub fn extract_text_before_marker<'a>(text: &'a str, marker: &str) -> &'a str {
    match memmem::find(text.as_bytes(), marker.as_bytes()) {
        Some(at) => {
            let prefix = &text[..at];
            prefix.strip_suffix('\n').unwrap_or(prefix)
        }
        None => "",
    }
}

#[inline]
fn balanced_end(bytes: &[u8], open: usize, scan: BracketScan) -> Option<usize> {
    let nest_objects = scan == BracketScan::ArraysAndObjects;
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i = skip_string(bytes, i)?;
                continue;
            }
            b'[' => depth += 1,
            b'{' if nest_objects => depth += 1,
            b'}' if nest_objects => depth = depth.saturating_sub(1),
            b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index just past the closing quote of the string starting at `start`.
///
/// Lenient about raw control bytes, which show up in loosely escaped
/// upstream payloads.
#[inline]
fn skip_string(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Some(i + 1),
            b'\\' => i += 2,
            _ => i += 1,
        }
    }
    None
}
