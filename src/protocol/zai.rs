//! z.ai chat and file-upload wire types.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/v2/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamChatRequest {
    pub stream: bool,
    pub model: String,
    pub messages: Vec<UpstreamMessage>,
    pub signature_prompt: String,
    pub params: UpstreamParams,
    pub features: UpstreamFeatures,
    pub chat_id: String,
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<UpstreamFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user_message_id: Option<String>,
}

/// Flattened chat message: role plus plain text.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamMessage {
    pub role: String,
    pub content: String,
}

/// Always serialized as `{}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpstreamParams {}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamFeatures {
    pub image_generation: bool,
    pub web_search: bool,
    pub auto_web_search: bool,
    pub preview_mode: bool,
    pub enable_thinking: bool,
}

impl UpstreamFeatures {
    #[must_use]
    pub fn new(auto_web_search: bool, enable_thinking: bool) -> Self {
        Self {
            image_generation: false,
            web_search: false,
            auto_web_search,
            preview_mode: true,
            enable_thinking,
        }
    }
}

/// Response of `POST /api/v1/files/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileUploadResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub meta: FileMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub cdn_url: String,
}

/// An uploaded image as referenced from a chat request.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamFile {
    #[serde(rename = "type")]
    pub type_: String,
    pub file: FileUploadResponse,
    pub id: String,
    pub url: String,
    pub name: String,
    pub status: String,
    pub size: i64,
    pub error: String,
    #[serde(rename = "itemId")]
    pub item_id: String,
    pub media: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_user_msg_id: Option<String>,
}

impl UpstreamFile {
    #[must_use]
    pub fn uploaded_image(file: FileUploadResponse, item_id: String) -> Self {
        Self {
            type_: "image".to_string(),
            id: file.id.clone(),
            url: format!("/api/v1/files/{}/content", file.id),
            name: file.filename.clone(),
            status: "uploaded".to_string(),
            size: file.meta.size,
            error: String::new(),
            item_id,
            media: "image".to_string(),
            ref_user_msg_id: None,
            file,
        }
    }
}

/// Response of `GET /api/v1/auths/`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnonymousAuthResponse {
    #[serde(default)]
    pub token: String,
}
