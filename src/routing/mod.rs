pub mod dispatch;

use rustc_hash::FxHashMap;

/// Upstream id used for names missing from the table.
pub const FALLBACK_UPSTREAM_MODEL: &str = "GLM-4-6-API-V1";

const THINKING_SUFFIX: &str = "-thinking";
const SEARCH_SUFFIX: &str = "-search";

const BASE_MODELS: [(&str, &str); 7] = [
    ("GLM-4.5", "0727-360B-API"),
    ("GLM-4.6", "GLM-4-6-API-V1"),
    ("GLM-4.7", "glm-4.7"),
    ("GLM-4.5-V", "glm-4.5v"),
    ("GLM-4.6-V", "glm-4.6v"),
    ("GLM-4.5-Air", "0727-106B-API"),
    ("0808-360B-DR", "0808-360B-DR"),
];

const PUBLISHED_MODELS: [&str; 9] = [
    "GLM-4.5",
    "GLM-4.6",
    "GLM-4.7",
    "GLM-4.7-thinking",
    "GLM-4.7-thinking-search",
    "GLM-4.5-V",
    "GLM-4.6-V",
    "GLM-4.6-V-thinking",
    "GLM-4.5-Air",
];

const VISION_MODELS: [&str; 2] = ["glm-4.5v", "glm-4.6v"];
const VISION_MCP_SERVERS: [&str; 3] = [
    "vlm-image-search",
    "vlm-image-recognition",
    "vlm-image-processing",
];

/// A public model name split into its base name and feature suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFlags<'a> {
    pub base: &'a str,
    pub thinking: bool,
    pub search: bool,
}

/// Strip `-thinking` / `-search` suffixes, in any order and repeated.
#[must_use]
pub fn parse_model_flags(name: &str) -> ModelFlags<'_> {
    let mut flags = ModelFlags {
        base: name,
        thinking: false,
        search: false,
    };
    loop {
        if let Some(rest) = flags.base.strip_suffix(THINKING_SUFFIX) {
            flags.thinking = true;
            flags.base = rest;
        } else if let Some(rest) = flags.base.strip_suffix(SEARCH_SUFFIX) {
            flags.search = true;
            flags.base = rest;
        } else {
            return flags;
        }
    }
}

/// What to send upstream for one requested model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub upstream_id: &'static str,
    pub thinking: bool,
    pub search: bool,
    pub auto_web_search: bool,
    pub mcp_servers: &'static [&'static str],
}

/// Read-only mapping from public model names to upstream ids.
#[derive(Debug, Clone)]
pub struct ModelTable {
    base: FxHashMap<&'static str, &'static str>,
}

impl Default for ModelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: BASE_MODELS.iter().copied().collect(),
        }
    }

    /// Upstream id for a public name; unknown names fall back to GLM-4.6.
    #[must_use]
    pub fn resolve_target_model(&self, name: &str) -> &'static str {
        let flags = parse_model_flags(name);
        self.base
            .get(flags.base)
            .copied()
            .unwrap_or(FALLBACK_UPSTREAM_MODEL)
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> ResolvedModel {
        let flags = parse_model_flags(name);
        let upstream_id = self.resolve_target_model(name);
        let vision = VISION_MODELS.contains(&upstream_id);
        ResolvedModel {
            upstream_id,
            thinking: flags.thinking,
            search: flags.search,
            auto_web_search: flags.search && !vision,
            mcp_servers: if upstream_id == "glm-4.6v" {
                &VISION_MCP_SERVERS
            } else {
                &[]
            },
        }
    }

    /// Names listed by `/v1/models`.
    #[must_use]
    pub fn published(&self) -> &'static [&'static str] {
        &PUBLISHED_MODELS
    }
}
