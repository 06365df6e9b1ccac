use std::sync::Arc;

use base64::Engine as _;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, ORIGIN, REFERER, USER_AGENT};
use serde::Deserialize;

use super::http_transport::{sanitize_upstream_error, transport_error};
use super::upload::upload_images;
use super::HttpTransport;
use crate::config::UpstreamConfig;
use crate::error::ProxyError;
use crate::protocol::openai_chat::OpenAiChatRequest;
use crate::protocol::zai::{
    AnonymousAuthResponse, UpstreamChatRequest, UpstreamFeatures, UpstreamFile, UpstreamMessage,
    UpstreamParams,
};
use crate::routing::ResolvedModel;
use crate::state::VersionCache;
use crate::util::{truncate_on_char_boundary, unix_now_millis};

/// Bearer value that asks for an anonymous guest token.
pub const ANONYMOUS_TOKEN: &str = "free";

const CLIENT_VERSION: &str = "0.0.1";
const PLATFORM: &str = "web";

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

fn random_user_agent() -> &'static str {
    USER_AGENTS[fastrand::usize(..USER_AGENTS.len())]
}

/// Values a request signature is computed over.
#[derive(Debug, Clone, Copy)]
pub struct SignatureInput<'a> {
    pub user_id: &'a str,
    pub request_id: &'a str,
    pub prompt: &'a str,
    pub timestamp_ms: u64,
}

/// Produces the `X-Signature` header for a chat request.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, input: &SignatureInput<'_>) -> Option<String>;
}

/// Signs nothing; no `X-Signature` header is sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSigner;

impl RequestSigner for NoopSigner {
    fn sign(&self, _input: &SignatureInput<'_>) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    #[serde(default)]
    id: Option<serde_json::Value>,
}

/// `id` claim of a JWT, or `None` when the payload cannot be decoded.
///
/// A decodable payload without an `id` claim yields an empty id.
#[must_use]
pub fn decode_jwt_user_id(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
    Some(match claims.id {
        Some(serde_json::Value::String(id)) => id,
        Some(serde_json::Value::Number(id)) => id.to_string(),
        _ => String::new(),
    })
}

/// An upstream bearer token plus the user id embedded in it.
#[derive(Debug, Clone)]
pub struct Credentials {
    token: String,
    user_id: String,
}

impl Credentials {
    /// # Errors
    ///
    /// Returns [`ProxyError::Auth`] when the token is not a decodable JWT.
    pub fn from_token(token: String) -> Result<Self, ProxyError> {
        let user_id =
            decode_jwt_user_id(&token).ok_or_else(|| ProxyError::Auth("invalid token".into()))?;
        Ok(Self { token, user_id })
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

/// Fresh identifiers for one upstream chat call.
#[derive(Debug, Clone)]
pub struct ChatIds {
    pub chat_id: String,
    pub request_id: String,
    pub user_message_id: String,
    pub timestamp_ms: u64,
}

impl ChatIds {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            chat_id: uuid::Uuid::new_v4().to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            user_message_id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms: unix_now_millis(),
        }
    }
}

/// A fully assembled chat call, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedChat {
    pub ids: ChatIds,
    pub body: UpstreamChatRequest,
}

/// Client for the z.ai web chat API.
pub struct ZaiClient {
    http: HttpTransport,
    base_url: Arc<str>,
    upload_images: bool,
    versions: Arc<VersionCache>,
    signer: Arc<dyn RequestSigner>,
}

impl ZaiClient {
    #[must_use]
    pub fn new(http: HttpTransport, config: &UpstreamConfig, versions: Arc<VersionCache>) -> Self {
        Self {
            http,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            upload_images: config.upload_images,
            versions,
            signer: Arc::new(NoopSigner),
        }
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = signer;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        self.http.client()
    }

    #[must_use]
    pub fn versions(&self) -> &VersionCache {
        &self.versions
    }

    /// Turn the client's bearer value into upstream credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] when an anonymous token cannot be
    /// obtained and [`ProxyError::Auth`] when the token is not a JWT.
    pub async fn resolve_credentials(&self, bearer: &str) -> Result<Credentials, ProxyError> {
        if bearer == ANONYMOUS_TOKEN {
            let token = self.anonymous_token().await.map_err(|err| {
                tracing::error!(target: "zai_proxy::upstream", "failed to get anonymous token: {err}");
                ProxyError::Internal("Failed to get anonymous token".into())
            })?;
            return Credentials::from_token(token);
        }
        Credentials::from_token(bearer.to_string())
    }

    /// `GET {base_url}/api/v1/auths/` for a guest token.
    ///
    /// # Errors
    ///
    /// Returns a transport or upstream error, or [`ProxyError::Internal`]
    /// when the response carries no token.
    pub async fn anonymous_token(&self) -> Result<String, ProxyError> {
        let response = self
            .http()
            .get(format!("{}/api/v1/auths/", self.base_url))
            .header(USER_AGENT, random_user_agent())
            .header(ORIGIN, &*self.base_url)
            .send()
            .await
            .map_err(|err| transport_error("anonymous token request failed", &err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error("anonymous token read failed", &err))?;
        if !status.is_success() {
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                message: sanitize_upstream_error(&body),
            });
        }
        let auth: AnonymousAuthResponse = serde_json::from_slice(&body)
            .map_err(|err| ProxyError::Internal(format!("invalid auth response: {err}")))?;
        if auth.token.is_empty() {
            return Err(ProxyError::Internal("auth response has no token".into()));
        }
        Ok(auth.token)
    }

    /// Upload request images (when enabled) and assemble the chat body.
    pub async fn prepare_chat(
        &self,
        credentials: &Credentials,
        request: &OpenAiChatRequest,
        model: &ResolvedModel,
        stream: bool,
    ) -> PreparedChat {
        let ids = ChatIds::generate();
        let files = if self.upload_images {
            let refs: Vec<&str> = request
                .messages
                .iter()
                .flat_map(|message| message.content.image_urls())
                .collect();
            upload_images(self.http(), &self.base_url, credentials.token(), refs).await
        } else {
            Vec::new()
        };
        let body = build_chat_body(request, model, stream, files, &ids);
        PreparedChat { ids, body }
    }

    /// `{base_url}/api/v2/chat/completions` with the web client's query.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] when the base URL does not parse.
    pub fn chat_url(&self, credentials: &Credentials, ids: &ChatIds) -> Result<url::Url, ProxyError> {
        let mut url = url::Url::parse(&format!("{}/api/v2/chat/completions", self.base_url))
            .map_err(|err| ProxyError::Config(format!("invalid upstream base_url: {err}")))?;
        let timestamp = ids.timestamp_ms.to_string();
        let current_url = format!("{}/c/{}", self.base_url, ids.chat_id);
        let pathname = format!("/c/{}", ids.chat_id);
        url.query_pairs_mut()
            .append_pair("timestamp", &timestamp)
            .append_pair("requestId", &ids.request_id)
            .append_pair("user_id", credentials.user_id())
            .append_pair("version", CLIENT_VERSION)
            .append_pair("platform", PLATFORM)
            .append_pair("token", credentials.token())
            .append_pair("current_url", &current_url)
            .append_pair("pathname", &pathname)
            .append_pair("signature_timestamp", &timestamp);
        Ok(url)
    }

    /// Request headers for a chat call.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Auth`] when the token is not a valid header value.
    pub fn chat_headers(
        &self,
        credentials: &Credentials,
        prepared: &PreparedChat,
    ) -> Result<HeaderMap, ProxyError> {
        let mut headers = HeaderMap::with_capacity(8);
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.token()))
            .map_err(|_| ProxyError::Auth("invalid token".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(version) = HeaderValue::from_str(&self.versions.current()) {
            headers.insert("x-fe-version", version);
        }
        if let Ok(origin) = HeaderValue::from_str(&self.base_url) {
            headers.insert(ORIGIN, origin);
        }
        let referer = format!("{}/c/{}", self.base_url, uuid::Uuid::new_v4());
        if let Ok(referer) = HeaderValue::from_str(&referer) {
            headers.insert(REFERER, referer);
        }
        headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));

        let signature = self.signer.sign(&SignatureInput {
            user_id: credentials.user_id(),
            request_id: &prepared.ids.request_id,
            prompt: &prepared.body.signature_prompt,
            timestamp_ms: prepared.ids.timestamp_ms,
        });
        if let Some(signature) = signature.and_then(|value| HeaderValue::from_str(&value).ok()) {
            headers.insert("x-signature", signature);
        }
        Ok(headers)
    }

    /// `POST` the chat request and return the streaming response.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] on connection failure and
    /// [`ProxyError::Upstream`] on a non-2xx status.
    pub async fn send_chat(
        &self,
        credentials: &Credentials,
        prepared: &PreparedChat,
    ) -> Result<reqwest::Response, ProxyError> {
        let url = self.chat_url(credentials, &prepared.ids)?;
        let headers = self.chat_headers(credentials, prepared)?;
        let body = serde_json::to_vec(&prepared.body)
            .map_err(|err| ProxyError::Internal(format!("failed to encode chat body: {err}")))?;

        tracing::debug!(
            target: "zai_proxy::upstream",
            model = %prepared.body.model,
            chat_id = %prepared.ids.chat_id,
            files = prepared.body.files.len(),
            "sending chat request"
        );

        let response = self
            .http()
            .post(url)
            .headers(headers)
            .body(Bytes::from(body))
            .send()
            .await
            .map_err(|err| transport_error("upstream request failed", &err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        let raw = String::from_utf8_lossy(&body);
        tracing::error!(
            target: "zai_proxy::upstream",
            status = status.as_u16(),
            body = truncate_on_char_boundary(&raw, 500),
            "upstream returned an error status"
        );
        Err(ProxyError::Upstream {
            status: status.as_u16(),
            message: sanitize_upstream_error(&body),
        })
    }
}

/// Assemble the upstream chat body from the client request.
#[must_use]
pub fn build_chat_body(
    request: &OpenAiChatRequest,
    model: &ResolvedModel,
    stream: bool,
    mut files: Vec<UpstreamFile>,
    ids: &ChatIds,
) -> UpstreamChatRequest {
    let messages = request
        .messages
        .iter()
        .map(|message| UpstreamMessage {
            role: message.role.clone(),
            content: message.content.text(),
        })
        .collect();

    let current_user_message_id = if files.is_empty() {
        None
    } else {
        for file in &mut files {
            file.ref_user_msg_id = Some(ids.user_message_id.clone());
        }
        Some(ids.user_message_id.clone())
    };

    UpstreamChatRequest {
        stream,
        model: model.upstream_id.to_string(),
        messages,
        signature_prompt: request.latest_user_text(),
        params: UpstreamParams::default(),
        features: UpstreamFeatures::new(model.auto_web_search, model.thinking),
        chat_id: ids.chat_id.clone(),
        id: uuid::Uuid::new_v4().to_string(),
        mcp_servers: model.mcp_servers.iter().map(|s| (*s).to_string()).collect(),
        files,
        current_user_message_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use crate::config::AppConfig;
    use crate::protocol::zai::FileUploadResponse;
    use crate::routing::ModelTable;

    fn jwt(payload: &str) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.sig",
            engine.encode(br#"{"alg":"HS256"}"#),
            engine.encode(payload.as_bytes())
        )
    }

    fn client() -> ZaiClient {
        let config = AppConfig::default();
        let http = HttpTransport::new(&config).unwrap();
        ZaiClient::new(
            http,
            &config.upstream,
            Arc::new(VersionCache::new("20241108.1")),
        )
    }

    fn request(json: &str) -> OpenAiChatRequest {
        serde_json::from_str(json).unwrap()
    }

    struct FixedSigner;

    impl RequestSigner for FixedSigner {
        fn sign(&self, input: &SignatureInput<'_>) -> Option<String> {
            Some(format!("{}:{}", input.user_id, input.prompt))
        }
    }

    #[test]
    fn test_decode_jwt_user_id() {
        assert_eq!(
            decode_jwt_user_id(&jwt(r#"{"id":"user-1","email":"a@b"}"#)).as_deref(),
            Some("user-1")
        );
        assert_eq!(decode_jwt_user_id(&jwt(r#"{"sub":"x"}"#)).as_deref(), Some(""));
        assert_eq!(decode_jwt_user_id("not-a-jwt"), None);
        assert_eq!(decode_jwt_user_id("a.%%%.c"), None);
    }

    #[test]
    fn test_invalid_token_is_auth_error() {
        let err = Credentials::from_token("garbage".into()).unwrap_err();
        assert!(matches!(err, ProxyError::Auth(ref msg) if msg == "invalid token"));
    }

    #[test]
    fn test_chat_body_shape() {
        let table = ModelTable::new();
        let resolved = table.resolve("GLM-4.6-V-thinking");
        let ids = ChatIds::generate();
        let req = request(
            r#"{"model":"GLM-4.6-V-thinking","messages":[
                {"role":"system","content":"sys"},
                {"role":"user","content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}
            ]}"#,
        );
        let file = UpstreamFile::uploaded_image(FileUploadResponse::default(), "item".into());
        let body = build_chat_body(&req, &resolved, true, vec![file], &ids);
        assert_eq!(body.model, "glm-4.6v");
        assert_eq!(body.signature_prompt, "ab");
        assert_eq!(body.messages[1].content, "ab");
        assert!(body.features.enable_thinking);
        assert!(!body.features.auto_web_search);
        assert_eq!(body.mcp_servers.len(), 3);
        assert_eq!(body.current_user_message_id.as_deref(), Some(ids.user_message_id.as_str()));
        assert_eq!(body.files[0].ref_user_msg_id.as_deref(), Some(ids.user_message_id.as_str()));
        assert_ne!(body.id, body.chat_id);
    }

    #[test]
    fn test_chat_url_query() {
        let zai = client();
        let creds = Credentials::from_token(jwt(r#"{"id":"u1"}"#)).unwrap();
        let ids = ChatIds::generate();
        let url = zai.chat_url(&creds, &ids).unwrap();
        assert_eq!(url.path(), "/api/v2/chat/completions");
        let pairs: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(pairs["user_id"], "u1");
        assert_eq!(pairs["version"], "0.0.1");
        assert_eq!(pairs["platform"], "web");
        assert_eq!(pairs["token"], creds.token());
        assert_eq!(pairs["pathname"], format!("/c/{}", ids.chat_id));
        assert_eq!(pairs["current_url"], format!("https://chat.z.ai/c/{}", ids.chat_id));
        assert_eq!(pairs["timestamp"], pairs["signature_timestamp"]);
    }

    #[test]
    fn test_signature_header_only_when_signed() {
        let creds = Credentials::from_token(jwt(r#"{"id":"u1"}"#)).unwrap();
        let req = request(r#"{"messages":[{"role":"user","content":"hello"}]}"#);
        let resolved = ModelTable::new().resolve("GLM-4.6");
        let ids = ChatIds::generate();
        let prepared = PreparedChat {
            body: build_chat_body(&req, &resolved, false, Vec::new(), &ids),
            ids,
        };

        let headers = client().chat_headers(&creds, &prepared).unwrap();
        assert!(headers.get("x-signature").is_none());
        assert_eq!(headers["x-fe-version"], "20241108.1");
        assert_eq!(headers[ORIGIN], "https://chat.z.ai");

        let signed = client().with_signer(Arc::new(FixedSigner));
        let headers = signed.chat_headers(&creds, &prepared).unwrap();
        assert_eq!(headers["x-signature"], "u1:hello");
    }
}
