pub mod stream;

use serde::{Deserialize, Serialize};

/// `OpenAI` Chat Completion request wire type.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
}

/// `OpenAI` request message; only role and content are forwarded.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

/// Message content: plain text or a list of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Other(serde_json::Value),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

/// One element of an array-form message content.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(default, rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<ImageUrl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrl {
    #[serde(default)]
    pub url: String,
}

impl MessageContent {
    /// Concatenated text of the message; non-text parts contribute nothing.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|part| part.type_ == "text")
                .filter_map(|part| part.text.as_deref())
                .collect(),
            MessageContent::Other(_) => String::new(),
        }
    }

    /// Image references (`data:` URLs or http URLs) in part order.
    pub fn image_urls(&self) -> impl Iterator<Item = &str> {
        let parts: &[ContentPart] = match self {
            MessageContent::Parts(parts) => parts,
            _ => &[],
        };
        parts
            .iter()
            .filter(|part| part.type_ == "image_url")
            .filter_map(|part| part.image_url.as_ref())
            .map(|image| image.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

impl OpenAiChatRequest {
    /// Text of the most recent user message.
    #[must_use]
    pub fn latest_user_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == "user")
            .map(|message| message.content.text())
            .unwrap_or_default()
    }
}

/// `OpenAI` Chat Completion response wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
}

/// A single choice in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Option<OpenAiResponseMessage>,
    pub finish_reason: Option<String>,
}

/// Assistant message of a non-streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiResponseMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl OpenAiChatResponse {
    /// Single-choice assistant response.
    #[must_use]
    pub fn assistant(
        id: String,
        model: String,
        created: u64,
        content: String,
        reasoning: String,
    ) -> Self {
        Self {
            id,
            object: "chat.completion".to_owned(),
            created,
            model,
            choices: vec![OpenAiChoice {
                index: 0,
                message: Some(OpenAiResponseMessage {
                    role: "assistant".to_owned(),
                    content,
                    reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                }),
                finish_reason: Some("stop".to_owned()),
            }],
        }
    }

    /// Content and reasoning of the first choice, if any.
    #[must_use]
    pub fn first_message_text(&self) -> Option<(String, String)> {
        let message = self.choices.first()?.message.as_ref()?;
        Some((
            message.content.clone(),
            message.reasoning_content.clone().unwrap_or_default(),
        ))
    }
}

/// Entry of the `/v1/models` listing.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiModel<'a> {
    pub id: &'a str,
    pub object: &'static str,
    pub owned_by: &'static str,
}

/// `/v1/models` response body.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiModelList<'a> {
    pub object: &'static str,
    pub data: Vec<OpenAiModel<'a>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_content_text_and_images() {
        let request: OpenAiChatRequest = serde_json::from_str(
            r#"{"model":"GLM-4.6","stream":true,"messages":[
                {"role":"system","content":"be brief"},
                {"role":"user","content":[
                    {"type":"text","text":"What is "},
                    {"type":"image_url","image_url":{"url":"data:image/png;base64,AAAA"}},
                    {"type":"text","text":"this?"}
                ]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(request.stream, Some(true));
        assert_eq!(request.latest_user_text(), "What is this?");
        let images: Vec<&str> = request.messages[1].content.image_urls().collect();
        assert_eq!(images, vec!["data:image/png;base64,AAAA"]);
        assert_eq!(request.messages[0].content.text(), "be brief");
    }

    #[test]
    fn test_null_and_odd_content() {
        let request: OpenAiChatRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":null},{"role":"user","content":42}]}"#,
        )
        .unwrap();
        assert_eq!(request.messages[0].content.text(), "");
        assert_eq!(request.messages[1].content.text(), "");
        assert!(request.model.is_empty());
    }

    #[test]
    fn test_response_roundtrip_first_choice() {
        let response = OpenAiChatResponse::assistant(
            "chatcmpl-x".into(),
            "GLM-4.6".into(),
            1,
            "hi".into(),
            String::new(),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["choices"][0]["message"]["role"], "assistant");
        assert!(json["choices"][0]["message"].get("reasoning_content").is_none());
        assert_eq!(json["choices"][0]["finish_reason"], "stop");

        let decoded: OpenAiChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":null,"reasoning_content":"r"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            decoded.first_message_text(),
            Some((String::new(), "r".to_owned()))
        );
    }
}
