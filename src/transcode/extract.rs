use serde::Deserialize;

use crate::json_scan::{extract_bracketed, extract_text_before_marker, BracketScan};

const SEARCH_RESULT_MARKER: &str = "\"search_result\"";
const SEARCH_RESULT_KEY: &str = "\"search_result\":";
const IMAGE_SEARCH_MARKER: &str = "\"search_image\"";
const IMAGE_RESULT_KEY: &str = "\"result\":";
const MCP_MARKER: &str = "\"mcp\"";
const MCP_SERVER_MARKER: &str = "mcp-server";
const GLM_BLOCK_MARKER: &str = "<glm_block";

/// One web search hit that inline reference markers can point at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub ref_id: String,
}

/// One image search hit, rendered in encounter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSearchResult {
    pub title: String,
    pub link: String,
    pub thumbnail: Option<String>,
}

#[derive(Deserialize)]
struct ImageResultItem {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[inline]
#[must_use]
pub fn is_search_result_content(edit_content: &str) -> bool {
    edit_content.contains(SEARCH_RESULT_MARKER)
}

#[inline]
#[must_use]
pub fn is_image_search_content(edit_content: &str) -> bool {
    edit_content.contains(IMAGE_SEARCH_MARKER)
}

#[inline]
#[must_use]
pub fn is_mcp_content(edit_content: &str) -> bool {
    edit_content.contains(MCP_MARKER)
}

/// A `tool_call` snapshot that only describes a search tool invocation.
#[inline]
#[must_use]
pub fn is_search_tool_call(edit_content: &str, is_tool_call_phase: bool) -> bool {
    is_tool_call_phase
        && (edit_content.contains(MCP_MARKER) || edit_content.contains(MCP_SERVER_MARKER))
}

/// Prose that precedes an embedded `<glm_block` payload.
#[inline]
#[must_use]
pub fn text_before_glm_block(edit_content: &str) -> &str {
    extract_text_before_marker(edit_content, GLM_BLOCK_MARKER)
}

/// Decode the `"search_result"` array embedded in a snapshot.
///
/// Entries without a title or url are dropped one by one; a span that is
/// missing, truncated or not an array yields no results.
#[must_use]
pub fn parse_search_results(edit_content: &str) -> Vec<SearchResult> {
    let Some(span) = extract_bracketed(edit_content, SEARCH_RESULT_KEY, BracketScan::Arrays)
    else {
        return Vec::new();
    };
    let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(span) else {
        tracing::debug!(target: "zai_proxy::transcode", "undecodable search_result span");
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<SearchResult>(entry).ok())
        .filter(|result| !result.title.is_empty() && !result.url.is_empty())
        .collect()
}

/// Decode the image hits carried in the `"result"` array of an image search
/// snapshot.
#[must_use]
pub fn parse_image_search_results(edit_content: &str) -> Vec<ImageSearchResult> {
    let Some(span) =
        extract_bracketed(edit_content, IMAGE_RESULT_KEY, BracketScan::ArraysAndObjects)
    else {
        return Vec::new();
    };
    let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(span) else {
        tracing::debug!(target: "zai_proxy::transcode", "undecodable image result span");
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<ImageResultItem>(entry).ok())
        .filter(|item| item.kind == "text")
        .filter_map(|item| parse_image_search_text(&item.text))
        .collect()
}

/// Parse `Title: ...; Link: ...; Thumbnail: ...`.
///
/// The title ends at `;`, the link at `;` or end of text, the thumbnail runs
/// to the end. Returns `None` unless both title and link are present.
#[must_use]
pub fn parse_image_search_text(text: &str) -> Option<ImageSearchResult> {
    let title = labeled_field(text, "Title: ").and_then(|rest| {
        let end = rest.find(';')?;
        Some(rest[..end].trim())
    })?;
    let link = labeled_field(text, "Link: ").map(|rest| {
        let end = rest.find(';').unwrap_or(rest.len());
        rest[..end].trim()
    })?;
    let thumbnail = labeled_field(text, "Thumbnail: ").map(str::trim);

    if title.is_empty() || link.is_empty() {
        return None;
    }
    Some(ImageSearchResult {
        title: title.to_owned(),
        link: link.to_owned(),
        thumbnail: thumbnail.filter(|t| !t.is_empty()).map(str::to_owned),
    })
}

#[inline]
fn labeled_field<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let at = text.find(label)?;
    Some(&text[at + label.len()..])
}

/// Escape the characters that would break a Markdown link label.
pub(crate) fn escape_markdown_label(out: &mut String, label: &str) {
    for ch in label.chars() {
        if matches!(ch, '\\' | '[' | ']') {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// Render image hits as Markdown images, one per line.
#[must_use]
pub fn format_image_search_results(results: &[ImageSearchResult]) -> String {
    if results.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for result in results {
        out.push_str("\n![");
        escape_markdown_label(&mut out, &result.title);
        out.push_str("](");
        out.push_str(&result.link);
        out.push(')');
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_results_drop_incomplete_entries() {
        let text = r#"<glm_block>{"data":{"search_result": [
            {"title":"A","url":"https://a.example","index":1,"ref_id":"ref_1"},
            {"title":"","url":"https://b.example","index":2,"ref_id":"ref_2"},
            {"title":"C","index":3,"ref_id":"ref_3"},
            {"title":"D","url":"https://d.example","index":"bad","ref_id":"ref_4"}
        ]}}</glm_block>"#;
        let results = parse_search_results(text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ref_id, "ref_1");
        assert_eq!(results[0].index, 1);
    }

    #[test]
    fn search_results_keep_bracket_in_title() {
        let text = r#""search_result": [{"title":"a]b","url":"x","index":1,"ref_id":"r1"}]"#;
        let results = parse_search_results(text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "a]b");
    }

    #[test]
    fn truncated_search_results_are_empty() {
        assert!(parse_search_results(r#""search_result": [{"title":"a""#).is_empty());
    }

    #[test]
    fn image_results_parse_labeled_text() {
        let text = r#"{"type":"search_image","result": [
            {"type":"text","text":"Title: Cat [1]; Link: https://img/cat.png; Thumbnail: https://img/t.png"},
            {"type":"image","text":"Title: skipped; Link: x"},
            {"type":"text","text":"Link: https://no-title"}
        ]}"#;
        let results = parse_image_search_results(text);
        assert_eq!(
            results,
            vec![ImageSearchResult {
                title: "Cat [1]".into(),
                link: "https://img/cat.png".into(),
                thumbnail: Some("https://img/t.png".into()),
            }]
        );
        assert_eq!(
            format_image_search_results(&results),
            "\n![Cat \\[1\\]](https://img/cat.png)\n"
        );
    }

    #[test]
    fn image_text_link_runs_to_end() {
        let parsed = parse_image_search_text("Title: Dog; Link: https://d ").unwrap();
        assert_eq!(parsed.link, "https://d");
        assert_eq!(parsed.thumbnail, None);
        assert!(parse_image_search_text("Title: no terminator Link: x").is_none());
    }

    #[test]
    fn marker_predicates() {
        assert!(is_search_result_content(r#"{"search_result":[]}"#));
        assert!(is_image_search_content(r#"{"name":"search_image"}"#));
        assert!(is_mcp_content(r#"{"type":"mcp"}"#));
        assert!(is_search_tool_call("uses mcp-server", true));
        assert!(!is_search_tool_call("uses mcp-server", false));
        assert_eq!(text_before_glm_block("Hi\n<glm_block/>"), "Hi");
    }
}
