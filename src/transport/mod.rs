use std::sync::Arc;

use bytes::Bytes;

use crate::config::{BackendConfig, CountTokensConfig, InterceptorSetting};
use crate::error::GatewayError;
use crate::interceptor::{InterceptorFactory, InterceptorRegistry, MarkupInterceptor};

/// Build the shared HTTP client.
///
/// No request timeout is set: a streamed response lasts as long as the
/// backend keeps generating.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] when the TLS backend cannot be initialized.
pub fn build_http_client() -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .tcp_nodelay(true)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .map_err(|err| GatewayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// One configured `OpenAI`-compatible backend.
pub struct Backend {
    name: &'static str,
    client: reqwest::Client,
    base_url: String,
    chat_url: String,
    api_key: Option<String>,
    model: Option<String>,
    interceptor: Option<Arc<dyn InterceptorFactory>>,
}

impl Backend {
    /// Prepare a backend and resolve its interceptor once.
    #[must_use]
    pub fn new(
        name: &'static str,
        config: &BackendConfig,
        client: reqwest::Client,
        registry: &InterceptorRegistry,
    ) -> Self {
        let interceptor = match &config.interceptor {
            InterceptorSetting::Auto => registry.resolve(&config.base_url),
            InterceptorSetting::None => None,
            InterceptorSetting::Named(name) => registry.by_name(name),
        };
        if let Some(factory) = &interceptor {
            tracing::info!(backend = name, interceptor = factory.name(), "markup interceptor enabled");
        }
        Self {
            name,
            client,
            base_url: config.base_url.clone(),
            chat_url: config.chat_completions_url(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            interceptor,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn model_override(&self) -> Option<&str> {
        self.model.as_deref()
    }

    #[must_use]
    pub fn interceptor_name(&self) -> Option<&'static str> {
        self.interceptor.as_ref().map(|factory| factory.name())
    }

    /// Fresh interceptor for one request, if this backend uses one.
    #[must_use]
    pub fn create_interceptor(&self) -> Option<Box<dyn MarkupInterceptor>> {
        self.interceptor.as_ref().map(|factory| factory.create())
    }

    /// POST a chat completion request.
    ///
    /// The configured key wins over `client_key`. A non-2xx status is read in
    /// full and returned as [`GatewayError::Upstream`] so the caller can relay
    /// it verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the request cannot be sent and
    /// [`GatewayError::Upstream`] for non-success statuses.
    pub async fn send_chat(
        &self,
        body: Bytes,
        client_key: Option<&str>,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut request = self
            .client
            .post(&self.chat_url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body);
        if stream {
            request = request.header(http::header::ACCEPT, "text/event-stream");
        }
        if let Some(key) = self.api_key.as_deref().or(client_key) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| {
            GatewayError::Transport(format!("{} request failed: {err}", self.name))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        tracing::warn!(
            backend = self.name,
            status = status.as_u16(),
            body_len = body.len(),
            "backend returned an error status"
        );
        Err(GatewayError::Upstream {
            status: status.as_u16(),
            body,
        })
    }
}

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A real Anthropic endpoint that answers `count_tokens`.
pub struct CountTokensUpstream {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl CountTokensUpstream {
    #[must_use]
    pub fn new(config: &CountTokensConfig, client: reqwest::Client) -> Self {
        tracing::info!(
            url = %config.base_url,
            model = %config.model,
            "count_tokens proxy enabled"
        );
        Self {
            client,
            url: config.count_tokens_url(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Forward a `count_tokens` body with its model replaced.
    ///
    /// Any status the endpoint answers with is returned as-is along with
    /// the body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] when the body is not a JSON
    /// object and [`GatewayError::Transport`] when the endpoint is unreachable.
    pub async fn forward(&self, body: &[u8]) -> Result<(http::StatusCode, Bytes), GatewayError> {
        let mut request: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(body).map_err(|err| {
                GatewayError::InvalidRequest(format!("Invalid JSON body: {err}"))
            })?;
        request.insert(
            "model".to_string(),
            serde_json::Value::String(self.model.clone()),
        );
        let payload = serde_json::to_vec(&request)
            .map_err(|err| GatewayError::Translation(err.to_string()))?;

        let response = self
            .client
            .post(&self.url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .body(payload)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(format!("count_tokens request failed: {err}")))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|err| {
            GatewayError::Transport(format!("count_tokens response read failed: {err}"))
        })?;
        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                body_len = body.len(),
                "count_tokens endpoint returned an error status"
            );
        }
        Ok((status, body))
    }
}

impl std::fmt::Debug for CountTokensUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountTokensUpstream")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("chat_url", &self.chat_url)
            .field("model", &self.model)
            .field("interceptor", &self.interceptor_name())
            .finish_non_exhaustive()
    }
}
