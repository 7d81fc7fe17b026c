use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "thinkbridge-rs is running",
        "config": {
            "backend": state.backend.base_url(),
            "vision_backend": state.vision_backend.as_ref().map(|backend| backend.base_url()),
            "count_tokens": state.count_tokens.as_ref().map(|upstream| upstream.url()),
            "features": {
                "log_level": config.features.log_level,
                "keep_rounds": config.features.keep_rounds,
                "vision_keep_rounds": config.features.vision_keep_rounds,
                "token_scale": config.features.token_scale,
                "ultrathink": config.features.ultrathink_prompt().is_some(),
            }
        }
    }))
}
