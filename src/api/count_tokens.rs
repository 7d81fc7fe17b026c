use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use serde_json::{json, Value};

use crate::observability::token_counter::estimate_tokens_for_len;
use crate::state::AppState;

/// Relay to the configured Anthropic endpoint, or fall back to the local
/// estimate when none is configured.
pub async fn handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Some(upstream) = state.count_tokens.as_ref() else {
        return estimate(&body).into_response();
    };
    match upstream.forward(&body).await {
        Ok((status, payload)) => {
            let mut response = Response::new(Body::from(payload));
            *response.status_mut() = status;
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(err) => err.into_response(),
    }
}

/// `{"input_tokens": ceil(body_len / 4)}` for the raw request body.
pub fn estimate(body: &[u8]) -> Json<Value> {
    Json(json!({ "input_tokens": estimate_tokens_for_len(body.len()) }))
}
