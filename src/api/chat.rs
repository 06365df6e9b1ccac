use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};

use super::common::{aggregate_chat_response, stream_chat_response, AggregateContext, CompletionLog};
use crate::error::ProxyError;
use crate::protocol::openai_chat::stream::ChunkEncoder;
use crate::protocol::openai_chat::OpenAiChatRequest;
use crate::state::AppState;
use crate::util::unix_now_secs;

/// Bearer token from `Authorization`; a missing `Bearer ` prefix is tolerated.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .trim_start();
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    // A bare scheme carries no credentials.
    (!token.is_empty() && token != "Bearer").then_some(token)
}

/// `POST /v1/chat/completions`.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    match handler_inner(state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handler_inner(
    state: Arc<AppState>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ProxyError> {
    let started = Instant::now();
    let bearer = bearer_token(headers).ok_or_else(|| ProxyError::Auth("Unauthorized".into()))?;

    let mut request: OpenAiChatRequest = serde_json::from_slice(body).map_err(|err| {
        tracing::debug!(target: "zai_proxy::request", "invalid chat request: {err}");
        ProxyError::InvalidRequest("Invalid request".into())
    })?;
    if request.model.is_empty() {
        request.model.clone_from(&state.config.features.default_model);
    }
    let stream = request.stream.unwrap_or(false) && !state.buffered_only();

    let credentials = state.zai.resolve_credentials(bearer).await?;
    let model = state.models.resolve(&request.model);
    let prepared = state
        .zai
        .prepare_chat(&credentials, &request, &model, stream)
        .await;
    let upstream = state.zai.send_chat(&credentials, &prepared).await?;

    let seq = state.next_request_seq();
    let id = state.completion_id(seq);
    let created = unix_now_secs();
    tracing::debug!(
        target: "zai_proxy::request",
        request_seq = seq,
        model = %request.model,
        upstream_model = model.upstream_id,
        stream,
        "upstream accepted chat request"
    );

    let log = CompletionLog::new(&request.model, stream, started);
    if stream {
        let encoder = ChunkEncoder::new(id, request.model, created);
        Ok(stream_chat_response(upstream, encoder, log))
    } else {
        let ctx = AggregateContext {
            id,
            model: request.model,
            created,
        };
        aggregate_chat_response(upstream, ctx, log).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def"),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("free"));
        assert_eq!(bearer_token(&headers), Some("free"));

        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("  Bearer  tok  "),
        );
        assert_eq!(bearer_token(&headers), Some("tok"));
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let state = Arc::new(AppState::from_config(crate::config::AppConfig::default()).unwrap());
        let response = handler(State(state), HeaderMap::new(), bytes::Bytes::new()).await;
        assert_eq!(response.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_json_is_bad_request() {
        let state = Arc::new(AppState::from_config(crate::config::AppConfig::default()).unwrap());
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer x.y.z"),
        );
        let response = handler(State(state), headers, bytes::Bytes::from_static(b"{nope")).await;
        assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
    }
}
