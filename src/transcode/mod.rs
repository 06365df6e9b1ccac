//! Upstream event transcoding.
//!
//! [`EventDispatcher`] consumes decoded upstream events one at a time and
//! produces [`OutputFragment`]s. The streaming and buffered responders are
//! both thin loops over the same dispatcher.

pub mod dispatcher;
pub mod event;
pub mod extract;
pub mod search_ref;
pub mod thinking;

pub use dispatcher::{transcode_lines, DispatchFlow, EventDispatcher, Fragments, TranscodedMessage};
pub use event::{Phase, UpstreamEvent};
pub use extract::{ImageSearchResult, SearchResult};
pub use search_ref::SearchRefFilter;
pub use thinking::ThinkingFilter;

/// Output channel of a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Content,
    Reasoning,
}

/// A piece of client-visible text. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFragment {
    pub kind: FragmentKind,
    pub text: String,
}

impl OutputFragment {
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Content,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Reasoning,
            text: text.into(),
        }
    }
}

/// Why a transcoded completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
        }
    }
}
