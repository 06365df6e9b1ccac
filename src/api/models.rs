use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{body::Body, http::StatusCode};

use crate::error::ProxyError;
use crate::protocol::openai_chat::{OpenAiModel, OpenAiModelList};
use crate::state::AppState;

fn models_response_body(state: &AppState) -> Result<Vec<u8>, ProxyError> {
    let list = OpenAiModelList {
        object: "list",
        data: state
            .models
            .published()
            .iter()
            .copied()
            .map(|id| OpenAiModel {
                id,
                object: "model",
                owned_by: "z.ai",
            })
            .collect(),
    };
    serde_json::to_vec(&list)
        .map_err(|err| ProxyError::Internal(format!("failed to encode model list: {err}")))
}

/// List the published model names in `OpenAI` format.
pub async fn handler(State(state): State<Arc<AppState>>) -> Response {
    match models_response_body(&state) {
        Ok(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderValue::from_static("application/json"),
            )],
            Body::from(body),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_handler_lists_published_models() {
        let state = Arc::new(AppState::from_config(AppConfig::default()).unwrap());
        let response = handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["object"], "list");
        let data = body["data"].as_array().unwrap();
        assert!(data.iter().any(|m| m["id"] == "GLM-4.6"));
        assert!(data.iter().all(|m| m["owned_by"] == "z.ai" && m["object"] == "model"));
    }
}
