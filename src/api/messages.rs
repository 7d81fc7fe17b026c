use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use http::HeaderMap;

use crate::compress::{
    compress_history_owned, history_has_image, strip_stale_images, trim_to_rounds,
    CompressionStats,
};
use crate::convert::{translate_request, translate_response, TranslateOptions};
use crate::error::GatewayError;
use crate::interceptor::MarkupInterceptor;
use crate::observability::log_request_complete;
use crate::observability::token_counter::estimate_request_tokens;
use crate::protocol::anthropic::{AnthropicMessage, AnthropicRequest};
use crate::protocol::openai_chat::OpenAiChatResponse;
use crate::state::AppState;
use crate::stream::{transcode_stream, StreamTranscoder};
use crate::transport::Backend;

const X_API_KEY: &str = "x-api-key";

/// `POST /v1/messages`.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handle(&state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, GatewayError> {
    let started = Instant::now();
    let mut request: AnthropicRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::InvalidRequest(format!("Invalid request body: {err}")))?;

    let turns = std::mem::take(&mut request.messages);
    let (backend, turns, stats) = prepare_history(state, turns);
    request.messages = turns;

    let client_model = request.model.clone();
    let stream = request.is_stream();
    let input_tokens = estimate_request_tokens(&request);

    tracing::info!(
        model = %client_model,
        backend = backend.name(),
        stream,
        turns = request.messages.len(),
        compressed = !stats.is_empty(),
        "forwarding request"
    );
    if !stats.is_empty() {
        tracing::debug!(
            thinking_blocks = stats.thinking_blocks,
            tool_calls = stats.tool_calls,
            tool_results = stats.tool_results,
            images = stats.images,
            "history compressed"
        );
    }

    let options = TranslateOptions {
        model_override: backend.model_override(),
        ultrathink_prompt: state.config.features.ultrathink_prompt(),
    };
    let chat_request = {
        let mut history_hook = backend.create_interceptor();
        translate_request(
            request,
            history_hook
                .as_deref_mut()
                .map(|hook| hook as &mut dyn MarkupInterceptor),
            &options,
        )
    };
    let chat_body = serde_json::to_vec(&chat_request)
        .map(Bytes::from)
        .map_err(|err| GatewayError::Translation(format!("Serialization error: {err}")))?;

    let response = backend
        .send_chat(chat_body, client_key(headers), stream)
        .await?;

    if stream {
        let transcoder = StreamTranscoder::new(
            state.next_message_id(),
            client_model,
            input_tokens,
            backend.create_interceptor(),
            Arc::clone(state.usage()),
        )
        .with_request_log(backend.name(), started);
        let frames = transcode_stream(response.bytes_stream(), transcoder);
        return Ok(sse_ok_response(Body::from_stream(
            frames.map(Ok::<Bytes, Infallible>),
        )));
    }

    let response_body = response.bytes().await.map_err(|err| {
        GatewayError::Transport(format!("{} response read failed: {err}", backend.name()))
    })?;
    let chat_response: OpenAiChatResponse = serde_json::from_slice(&response_body)
        .map_err(|err| GatewayError::Translation(format!("Invalid backend response: {err}")))?;
    let (message, usage) = translate_response(
        chat_response,
        state.next_message_id(),
        &client_model,
        state.usage(),
    );
    log_request_complete(&client_model, backend.name(), &usage, started);
    Ok(Json(message).into_response())
}

/// Strip stale images, compress old rounds, then pick the backend.
///
/// A request that still carries an image after stripping goes to the vision
/// backend, with its history cut to the vision window.
fn prepare_history(
    state: &AppState,
    turns: Vec<AnthropicMessage>,
) -> (&Backend, Vec<AnthropicMessage>, CompressionStats) {
    let features = &state.config.features;
    let (turns, images) = match &state.vision_backend {
        Some(_) => strip_stale_images(turns, features.vision_keep_rounds),
        None => (turns, 0),
    };
    let (turns, mut stats) = compress_history_owned(turns, features.keep_rounds);
    stats.images = images;

    match &state.vision_backend {
        Some(vision) if history_has_image(&turns) => (
            vision,
            trim_to_rounds(turns, features.vision_keep_rounds),
            stats,
        ),
        _ => (&state.backend, turns, stats),
    }
}

/// The client's own key: `x-api-key`, else a bearer token.
fn client_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(X_API_KEY).and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

#[inline]
fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_key_prefers_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_static("Bearer from-bearer"),
        );
        assert_eq!(client_key(&headers), Some("from-bearer"));
        headers.insert(X_API_KEY, http::HeaderValue::from_static("from-header"));
        assert_eq!(client_key(&headers), Some("from-header"));
    }

    #[test]
    fn test_client_key_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), None);
        headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_static("Basic abc"),
        );
        assert_eq!(client_key(&headers), None);
    }
}
