use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Process-wide usage totals and the interceptor each backend uses.
pub fn status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let totals = state.usage().snapshot();
    Json(json!({
        "usage": totals,
        "token_scale": state.usage().scale_factor(),
        "interceptor": state.backend.interceptor_name(),
        "vision_interceptor": state
            .vision_backend
            .as_ref()
            .and_then(|backend| backend.interceptor_name()),
    }))
}
