use crate::transcode::{FinishReason, FragmentKind, OutputFragment};
use crate::util::{push_json_string_escaped, push_u64_decimal};

/// Encodes output fragments as `chat.completion.chunk` SSE frames.
///
/// Every chunk of one response shares `id`, `created` and `model`. The first
/// chunk carries `"role":"assistant"` in its delta.
#[derive(Debug, Clone)]
pub struct ChunkEncoder {
    id: String,
    model: String,
    created: u64,
    role_sent: bool,
}

impl ChunkEncoder {
    #[must_use]
    pub fn new(id: String, model: String, created: u64) -> Self {
        Self {
            id,
            model,
            created,
            role_sent: false,
        }
    }

    /// Encode one fragment. Empty fragments produce no frame.
    pub fn encode_fragment(&mut self, fragment: &OutputFragment) -> Option<String> {
        if fragment.text.is_empty() {
            return None;
        }
        let field = match fragment.kind {
            FragmentKind::Content => "content",
            FragmentKind::Reasoning => "reasoning_content",
        };
        let mut out =
            String::with_capacity(160 + self.id.len() + self.model.len() + fragment.text.len());
        self.push_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{");
        if !self.role_sent {
            out.push_str("\"role\":\"assistant\",");
            self.role_sent = true;
        }
        out.push('"');
        out.push_str(field);
        out.push_str("\":");
        push_json_string_escaped(&mut out, &fragment.text);
        out.push_str("},\"finish_reason\":null}]}\n\n");
        Some(out)
    }

    /// Final chunk: empty delta plus the finish reason.
    #[must_use]
    pub fn encode_finish(&self, reason: FinishReason) -> String {
        let mut out = String::with_capacity(128 + self.id.len() + self.model.len());
        self.push_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":");
        push_json_string_escaped(&mut out, reason.as_str());
        out.push_str("}]}\n\n");
        out
    }

    fn push_prefix(&self, out: &mut String) {
        out.push_str("data: {\"id\":");
        push_json_string_escaped(out, &self.id);
        out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
        push_u64_decimal(out, self.created);
        out.push_str(",\"model\":");
        push_json_string_escaped(out, &self.model);
    }
}
