mod request_id;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::interceptor::InterceptorRegistry;
use crate::observability::usage::UsageAggregator;
use crate::transport::{build_http_client, Backend, CountTokensUpstream};

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub backend: Backend,
    pub vision_backend: Option<Backend>,
    pub count_tokens: Option<CountTokensUpstream>,
    usage: Arc<UsageAggregator>,
    request_ids: RequestIdGenerator,
}

impl AppState {
    /// Build state from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the HTTP client cannot be built.
    pub fn new(config: AppConfig) -> Result<Self, GatewayError> {
        Self::with_registry(config, &InterceptorRegistry::builtin())
    }

    /// Build state resolving interceptors against a custom registry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the HTTP client cannot be built.
    pub fn with_registry(
        config: AppConfig,
        registry: &InterceptorRegistry,
    ) -> Result<Self, GatewayError> {
        let client = build_http_client()?;
        let backend = Backend::new("backend", &config.backend, client.clone(), registry);
        let vision_backend = config
            .vision_backend
            .as_ref()
            .map(|vision| Backend::new("vision_backend", vision, client.clone(), registry));
        let count_tokens = config
            .count_tokens
            .as_ref()
            .map(|count_tokens| CountTokensUpstream::new(count_tokens, client));
        let usage = Arc::new(UsageAggregator::new(config.features.token_scale));

        tracing::info!(
            backend = backend.base_url(),
            vision_backend = vision_backend.as_ref().map(Backend::base_url),
            keep_rounds = config.features.keep_rounds,
            token_scale = config.features.token_scale,
            "state initialized"
        );

        Ok(Self {
            config,
            backend,
            vision_backend,
            count_tokens,
            usage,
            request_ids: RequestIdGenerator::new(),
        })
    }

    #[must_use]
    pub fn usage(&self) -> &Arc<UsageAggregator> {
        &self.usage
    }

    /// A fresh `msg_...` id for one response.
    #[must_use]
    pub fn next_message_id(&self) -> String {
        let seq = self.request_ids.next_seq();
        self.request_ids.message_id(seq)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.backend)
            .field("vision_backend", &self.vision_backend)
            .field("count_tokens", &self.count_tokens)
            .finish_non_exhaustive()
    }
}
