use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use thinkbridge::config::{
    AppConfig, BackendConfig, CountTokensConfig, FeaturesConfig, InterceptorSetting, ServerConfig,
};
use thinkbridge::routing::dispatch::dispatch_request;
use thinkbridge::state::AppState;

#[derive(Clone)]
enum MockReply {
    Json(Value),
    Sse(String),
    Status(StatusCode, Value),
}

#[derive(Debug, Clone)]
struct RecordedRequest {
    authorization: Option<String>,
    body: Value,
}

struct MockBackend {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    server: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn spawn_backend(reply: MockReply) -> MockBackend {
    let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&requests);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let recorded = Arc::clone(&recorded);
            let reply = reply.clone();
            async move {
                recorded.lock().push(RecordedRequest {
                    authorization: headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                    body,
                });
                match reply {
                    MockReply::Json(payload) => Json(payload).into_response(),
                    MockReply::Sse(text) => {
                        ([(header::CONTENT_TYPE, "text/event-stream")], text).into_response()
                    }
                    MockReply::Status(status, payload) => (status, Json(payload)).into_response(),
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockBackend {
        base_url: format!("http://{addr}/v1"),
        requests,
        server,
    }
}

fn backend_config(base_url: &str) -> BackendConfig {
    BackendConfig {
        base_url: base_url.to_string(),
        api_key: None,
        model: None,
        interceptor: InterceptorSetting::Auto,
    }
}

fn build_state(backend: BackendConfig, features: FeaturesConfig) -> Arc<AppState> {
    build_state_with_vision(backend, None, features)
}

fn build_state_with_vision(
    backend: BackendConfig,
    vision_backend: Option<BackendConfig>,
    features: FeaturesConfig,
) -> Arc<AppState> {
    let config = AppConfig {
        server: ServerConfig::default(),
        backend,
        vision_backend,
        count_tokens: None,
        features,
    };
    Arc::new(AppState::new(config).expect("build state"))
}

fn post_messages(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .header("x-api-key", "client-key")
        .body(Body::from(serde_json::to_vec(body).expect("serialize request")))
        .expect("build request")
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> Response {
    dispatch_request(Arc::clone(state), request)
        .await
        .expect("dispatch")
}

async fn body_bytes(response: Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body")
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

/// Split an SSE body into `(event name, data)` pairs.
fn sse_events(body: &[u8]) -> Vec<(String, Value)> {
    let text = std::str::from_utf8(body).expect("utf8 body");
    text.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut name = String::new();
            let mut data = Value::Null;
            for line in frame.lines() {
                if let Some(event) = line.strip_prefix("event: ") {
                    name = event.to_string();
                } else if let Some(payload) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(payload).expect("frame json");
                }
            }
            (name, data)
        })
        .collect()
}

fn sse_body(payloads: &[&str]) -> String {
    let mut out = String::new();
    for payload in payloads {
        out.push_str("data: ");
        out.push_str(payload);
        out.push_str("\n\n");
    }
    out
}

#[tokio::test]
async fn test_non_streaming_round_trip() {
    let mock = spawn_backend(MockReply::Json(json!({
        "id": "chatcmpl_mock",
        "model": "glm-4.6",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "reasoning_content": "plan",
                "content": "pong"
            },
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14}
    })))
    .await;

    let mut backend = backend_config(&mock.base_url);
    backend.api_key = Some("backend-secret".to_string());
    backend.model = Some("glm-4.6".to_string());
    let features = FeaturesConfig {
        token_scale: 0.5,
        ..FeaturesConfig::default()
    };
    let state = build_state(backend, features);

    let response = send(
        &state,
        post_messages(&json!({
            "model": "claude-sonnet-4",
            "system": "be brief",
            "max_tokens": 256,
            "messages": [{"role": "user", "content": "ping"}]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payload = body_json(response).await;
    assert_eq!(payload["type"], "message");
    assert_eq!(payload["role"], "assistant");
    assert_eq!(payload["model"], "claude-sonnet-4");
    assert!(payload["id"].as_str().is_some_and(|id| id.starts_with("msg_")));
    assert_eq!(payload["content"][0]["type"], "thinking");
    assert_eq!(payload["content"][0]["thinking"], "plan");
    assert_eq!(payload["content"][1]["type"], "text");
    assert_eq!(payload["content"][1]["text"], "pong");
    assert_eq!(payload["stop_reason"], "end_turn");
    assert_eq!(payload["usage"]["input_tokens"], 5);
    assert_eq!(payload["usage"]["output_tokens"], 2);

    let recorded = mock.requests();
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0].authorization.as_deref(),
        Some("Bearer backend-secret")
    );
    let sent = &recorded[0].body;
    assert_eq!(sent["model"], "glm-4.6");
    assert_eq!(sent["max_tokens"], 256);
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][0]["content"], "be brief");
    assert_eq!(sent["messages"][1]["role"], "user");
    assert_eq!(sent["messages"][1]["content"], "ping");
    assert!(sent.get("stream_options").is_none());

    let status = body_json(
        send(
            &state,
            Request::builder()
                .uri("/status")
                .body(Body::empty())
                .expect("build status request"),
        )
        .await,
    )
    .await;
    assert_eq!(status["usage"]["requests"], 1);
    assert_eq!(status["usage"]["prompt_tokens"], 5);
    assert_eq!(status["usage"]["completion_tokens"], 2);
    assert_eq!(status["interceptor"], Value::Null);
}

#[tokio::test]
async fn test_streaming_round_trip() {
    let mock = spawn_backend(MockReply::Sse(sse_body(&[
        r#"{"choices":[{"delta":{"role":"assistant","reasoning_content":"hmm"}}]}"#,
        r#"{"choices":[{"delta":{"content":"hi"}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        "[DONE]",
    ])))
    .await;
    let state = build_state(backend_config(&mock.base_url), FeaturesConfig::default());

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .header("authorization", "Bearer client-token")
        .body(Body::from(
            serde_json::to_vec(&json!({
                "model": "claude-sonnet-4",
                "stream": true,
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .expect("serialize request"),
        ))
        .expect("build request");
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(&b"text/event-stream"[..])
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
        Some(&b"no-cache"[..])
    );

    let events = sse_events(&body_bytes(response).await);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        [
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    assert_eq!(events[0].1["message"]["model"], "claude-sonnet-4");
    assert_eq!(events[1].1["content_block"]["type"], "thinking");
    assert_eq!(events[2].1["delta"]["thinking"], "hmm");
    assert_eq!(events[4].1["index"], 1);
    assert_eq!(events[5].1["delta"]["text"], "hi");
    assert_eq!(events[7].1["delta"]["stop_reason"], "end_turn");
    assert_eq!(events[7].1["usage"]["output_tokens"], 2);

    let recorded = mock.requests();
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0].authorization.as_deref(),
        Some("Bearer client-token")
    );
    assert_eq!(recorded[0].body["stream"], true);
    assert_eq!(recorded[0].body["stream_options"]["include_usage"], true);
}

#[tokio::test]
async fn test_streaming_synthesizes_tool_call_from_markup() {
    let mock = spawn_backend(MockReply::Sse(sse_body(&[
        r#"{"choices":[{"delta":{"reasoning_content":"check <tool_call>get_weather\n<arg_key>city</arg_key>"}}]}"#,
        r#"{"choices":[{"delta":{"reasoning_content":"<arg_value>Paris</arg_value></tool_call>"}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        "[DONE]",
    ])))
    .await;
    let mut backend = backend_config(&mock.base_url);
    backend.interceptor = InterceptorSetting::Named("zhipu".to_string());
    let state = build_state(backend, FeaturesConfig::default());

    let response = send(
        &state,
        post_messages(&json!({
            "model": "glm",
            "stream": true,
            "messages": [{"role": "user", "content": "weather?"}]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let events = sse_events(&body_bytes(response).await);
    let tool_start = events
        .iter()
        .find(|(name, data)| {
            name == "content_block_start" && data["content_block"]["type"] == "tool_use"
        })
        .expect("tool_use block");
    assert_eq!(tool_start.1["content_block"]["name"], "get_weather");
    assert!(events.iter().any(|(name, data)| {
        name == "content_block_delta" && data["delta"]["partial_json"] == "{\"city\":\"Paris\"}"
    }));
    assert_eq!(events.last().map(|(name, _)| name.as_str()), Some("message_stop"));
}

#[tokio::test]
async fn test_backend_error_is_relayed_verbatim() {
    let error_body = json!({"error": {"message": "slow down", "code": "1302"}});
    let mock = spawn_backend(MockReply::Status(
        StatusCode::TOO_MANY_REQUESTS,
        error_body.clone(),
    ))
    .await;
    let state = build_state(backend_config(&mock.base_url), FeaturesConfig::default());

    let response = send(
        &state,
        post_messages(&json!({
            "model": "m",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(response).await, error_body);
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);

    let state = build_state(
        backend_config(&format!("http://{addr}/v1")),
        FeaturesConfig::default(),
    );
    let response = send(
        &state,
        post_messages(&json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let payload = body_json(response).await;
    assert_eq!(payload["type"], "error");
    assert_eq!(payload["error"]["type"], "api_error");
}

#[tokio::test]
async fn test_old_rounds_are_compressed_before_forwarding() {
    let mock = spawn_backend(MockReply::Json(json!({
        "choices": [{"message": {"content": "done"}, "finish_reason": "stop"}]
    })))
    .await;
    let features = FeaturesConfig {
        keep_rounds: 1,
        ..FeaturesConfig::default()
    };
    let state = build_state(backend_config(&mock.base_url), features);

    let response = send(
        &state,
        post_messages(&json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "q1"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "let me look", "signature": "sig"},
                    {"type": "tool_use", "id": "t1", "name": "lookup", "input": {"q": "x"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "a very long result"}
                ]},
                {"role": "assistant", "content": "a1"},
                {"role": "user", "content": "q2"}
            ]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let recorded = mock.requests();
    let messages = recorded[0].body["messages"]
        .as_array()
        .expect("messages array")
        .clone();
    let assistant = &messages[1];
    assert_eq!(assistant["role"], "assistant");
    assert!(assistant.get("reasoning_content").is_none());
    assert_eq!(
        assistant["tool_calls"][0]["function"]["arguments"],
        "{\"compressed\":true}"
    );
    let tool = messages
        .iter()
        .find(|message| message["role"] == "tool")
        .expect("tool message");
    assert_eq!(tool["tool_call_id"], "t1");
    assert_eq!(tool["content"], "[compressed]");
    assert_eq!(messages.last().map(|m| &m["content"]), Some(&json!("q2")));
}

fn image_block() -> Value {
    json!({"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBORw0KGgo="}})
}

#[tokio::test]
async fn test_recent_image_routes_to_vision_backend() {
    let reply = MockReply::Json(json!({
        "choices": [{"message": {"content": "a cat"}, "finish_reason": "stop"}]
    }));
    let text_mock = spawn_backend(reply.clone()).await;
    let vision_mock = spawn_backend(reply).await;
    let state = build_state_with_vision(
        backend_config(&text_mock.base_url),
        Some(backend_config(&vision_mock.base_url)),
        FeaturesConfig::default(),
    );

    let response = send(
        &state,
        post_messages(&json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "old"}, image_block()]},
                {"role": "assistant", "content": "ok"},
                {"role": "user", "content": [{"type": "text", "text": "what is this?"}, image_block()]}
            ]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(text_mock.requests().is_empty());
    let recorded = vision_mock.requests();
    assert_eq!(recorded.len(), 1);
    let messages = recorded[0].body["messages"]
        .as_array()
        .expect("messages array")
        .clone();
    assert_eq!(messages.len(), 1);
    let parts = messages[0]["content"].as_array().expect("content parts");
    assert!(parts.iter().any(|part| part["type"] == "image_url"
        && part["image_url"]["url"] == "data:image/png;base64,iVBORw0KGgo="));
}

#[tokio::test]
async fn test_stale_image_stays_on_text_backend() {
    let reply = MockReply::Json(json!({
        "choices": [{"message": {"content": "sure"}, "finish_reason": "stop"}]
    }));
    let text_mock = spawn_backend(reply.clone()).await;
    let vision_mock = spawn_backend(reply).await;
    let state = build_state_with_vision(
        backend_config(&text_mock.base_url),
        Some(backend_config(&vision_mock.base_url)),
        FeaturesConfig::default(),
    );

    let response = send(
        &state,
        post_messages(&json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "old"}, image_block()]},
                {"role": "assistant", "content": "ok"},
                {"role": "user", "content": "and now?"}
            ]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(vision_mock.requests().is_empty());
    let recorded = text_mock.requests();
    assert_eq!(recorded.len(), 1);
    let sent = recorded[0].body.to_string();
    assert!(sent.contains("[image omitted]"));
    assert!(!sent.contains("image_url"));
}

#[tokio::test]
async fn test_invalid_body_is_rejected() {
    let state = build_state(
        backend_config("http://127.0.0.1:9/v1"),
        FeaturesConfig::default(),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .body(Body::from("{not json"))
        .expect("build request");
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = body_json(response).await;
    assert_eq!(payload["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_count_tokens_and_routing_edges() {
    let state = build_state(
        backend_config("http://127.0.0.1:9/v1"),
        FeaturesConfig::default(),
    );

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages/count_tokens")
        .body(Body::from(vec![b'a'; 41]))
        .expect("build request");
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"input_tokens": 11}));

    let health = send(
        &state,
        Request::builder()
            .uri("/")
            .body(Body::empty())
            .expect("build request"),
    )
    .await;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(body_json(health).await["status"], "thinkbridge-rs is running");

    let not_found = send(
        &state,
        Request::builder()
            .uri("/v1/models")
            .body(Body::empty())
            .expect("build request"),
    )
    .await;
    assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

    let wrong_method = send(
        &state,
        Request::builder()
            .uri("/v1/messages")
            .body(Body::empty())
            .expect("build request"),
    )
    .await;
    assert_eq!(wrong_method.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[derive(Debug, Clone)]
struct RecordedCount {
    api_key: Option<String>,
    version: Option<String>,
    body: Value,
}

/// An Anthropic-style `count_tokens` endpoint answering with a fixed reply.
async fn spawn_count_tokens(
    status: StatusCode,
    reply: Value,
) -> (String, Arc<Mutex<Vec<RecordedCount>>>, tokio::task::JoinHandle<()>) {
    let requests: Arc<Mutex<Vec<RecordedCount>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&requests);
    let app = Router::new().route(
        "/v1/messages/count_tokens",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let recorded = Arc::clone(&recorded);
            let reply = reply.clone();
            async move {
                let header_text = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                recorded.lock().push(RecordedCount {
                    api_key: header_text("x-api-key"),
                    version: header_text("anthropic-version"),
                    body,
                });
                (status, Json(reply)).into_response()
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind count_tokens mock");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/"), requests, server)
}

fn state_with_count_tokens(base_url: &str) -> Arc<AppState> {
    let config = AppConfig {
        server: ServerConfig::default(),
        backend: backend_config("http://127.0.0.1:9/v1"),
        vision_backend: None,
        count_tokens: Some(CountTokensConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: "sk-ant-count".to_string(),
            model: "claude-sonnet-4-5".to_string(),
        }),
        features: FeaturesConfig::default(),
    };
    Arc::new(AppState::new(config).expect("build state"))
}

fn post_count_tokens(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/messages/count_tokens")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize request")))
        .expect("build request")
}

#[tokio::test]
async fn test_count_tokens_forwards_to_configured_endpoint() {
    let (base_url, requests, server) =
        spawn_count_tokens(StatusCode::OK, json!({"input_tokens": 1234})).await;
    let state = state_with_count_tokens(&base_url);

    let response = send(
        &state,
        post_count_tokens(&json!({
            "model": "claude-opus-4",
            "messages": [{"role": "user", "content": "how many tokens is this?"}]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"input_tokens": 1234}));

    let recorded = requests.lock().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].api_key.as_deref(), Some("sk-ant-count"));
    assert_eq!(recorded[0].version.as_deref(), Some("2023-06-01"));
    assert_eq!(recorded[0].body["model"], "claude-sonnet-4-5");
    assert_eq!(
        recorded[0].body["messages"][0]["content"],
        "how many tokens is this?"
    );
    server.abort();
}

#[tokio::test]
async fn test_count_tokens_relays_endpoint_error_status() {
    let error = json!({
        "type": "error",
        "error": {"type": "authentication_error", "message": "invalid x-api-key"}
    });
    let (base_url, _requests, server) =
        spawn_count_tokens(StatusCode::UNAUTHORIZED, error.clone()).await;
    let state = state_with_count_tokens(&base_url);

    let response = send(&state, post_count_tokens(&json!({"messages": []}))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await, error);
    server.abort();
}

#[tokio::test]
async fn test_count_tokens_proxy_rejects_non_json_body() {
    let (base_url, requests, server) =
        spawn_count_tokens(StatusCode::OK, json!({"input_tokens": 1})).await;
    let state = state_with_count_tokens(&base_url);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages/count_tokens")
        .body(Body::from("not json"))
        .expect("build request");
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(requests.lock().is_empty());
    server.abort();
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let state = build_state(
        backend_config("http://127.0.0.1:9/v1"),
        FeaturesConfig::default(),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .body(Body::from(vec![b' '; 32 * 1024 * 1024 + 1]))
        .expect("build request");
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
