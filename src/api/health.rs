use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "zai-proxy is running",
        "config": {
            "upstream": config.upstream.base_url,
            "fe_version": &*state.zai.versions().current(),
            "buffered_only": config.server.buffered_only,
            "upload_images": config.upstream.upload_images,
            "features": {
                "log_level": config.features.log_level,
                "default_model": config.features.default_model,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_health_reports_config_summary() {
        let state = Arc::new(AppState::from_config(AppConfig::default()).unwrap());
        let Json(body) = health_handler(State(state));
        assert_eq!(body["status"], "zai-proxy is running");
        assert_eq!(body["config"]["features"]["default_model"], "GLM-4.6");
        assert_eq!(body["config"]["fe_version"], "20241108.1");
    }
}
