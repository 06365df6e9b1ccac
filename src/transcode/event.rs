use serde::Deserialize;

/// Upstream label for the semantic kind of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Thinking,
    Answer,
    ToolCall,
    Other,
    Done,
    /// A label this proxy does not know; it still counts as "not thinking".
    Unknown,
}

impl Phase {
    /// Map the wire label; an empty label means "no phase".
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "" => None,
            "thinking" => Some(Self::Thinking),
            "answer" => Some(Self::Answer),
            "tool_call" => Some(Self::ToolCall),
            "other" => Some(Self::Other),
            "done" => Some(Self::Done),
            _ => Some(Self::Unknown),
        }
    }
}

/// One decoded `data:` line of the upstream stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamEvent {
    pub phase: Option<Phase>,
    pub delta_content: String,
    /// Full snapshot of the current block, already unescaped once.
    pub edit_content: String,
    pub done: bool,
}

#[derive(Deserialize)]
struct EnvelopeWire {
    #[serde(default)]
    data: Option<EventDataWire>,
}

#[derive(Deserialize)]
struct EventDataWire {
    #[serde(default)]
    delta_content: Option<String>,
    #[serde(default)]
    edit_content: Option<String>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    done: Option<bool>,
}

impl UpstreamEvent {
    /// Decode the JSON payload of a `data:` line.
    ///
    /// Returns `None` when the payload is not a JSON object of the expected
    /// shape; callers skip such lines.
    #[must_use]
    pub fn from_json(payload: &str) -> Option<Self> {
        let envelope: EnvelopeWire = serde_json::from_str(payload).ok()?;
        let Some(data) = envelope.data else {
            return Some(Self::default());
        };
        Some(Self {
            phase: Phase::from_wire(data.phase.as_deref().unwrap_or_default()),
            delta_content: data.delta_content.unwrap_or_default(),
            edit_content: decode_edit_content(data.edit_content.unwrap_or_default()),
            done: data.done.unwrap_or(false),
        })
    }

    #[must_use]
    pub fn delta(phase: Phase, text: impl Into<String>) -> Self {
        Self {
            phase: Some(phase),
            delta_content: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn edit(phase: Phase, text: impl Into<String>) -> Self {
        Self {
            phase: Some(phase),
            edit_content: text.into(),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn is_phase(&self, phase: Phase) -> bool {
        self.phase == Some(phase)
    }
}

/// Snapshots are sometimes sent as a JSON string literal; unescape one level.
fn decode_edit_content(raw: String) -> String {
    if !raw.starts_with('"') {
        return raw;
    }
    match serde_json::from_str::<String>(&raw) {
        Ok(decoded) => decoded,
        Err(_) => raw,
    }
}
