//! Backend-specific markup interceptors.
//!
//! Some backends emit tool calls as tag markup inside reasoning text instead
//! of structured `tool_calls` deltas. An interceptor rewrites both directions:
//! it strips the markup from replayed history and synthesizes structured
//! tool-call fragments from the live stream.

pub mod lexer;
pub mod zhipu;

use std::sync::Arc;

use crate::protocol::anthropic::AnthropicMessage;
use crate::protocol::openai_chat::OpenAiDelta;

/// First slot index used for synthesized tool calls.
///
/// Native backends number their slots from zero, so synthesized calls never
/// collide with them.
pub const SYNTHETIC_SLOT_BASE: u32 = 1_000_000;

/// Per-response markup interceptor.
pub trait MarkupInterceptor: Send {
    /// Rewrite a stored message before it is replayed to the backend.
    fn on_historical_message(&mut self, message: &mut AnthropicMessage);

    /// Inspect a live delta before transcoding; may append synthesized
    /// tool-call fragments to `delta.tool_calls`.
    fn on_live_delta(&mut self, delta: &mut OpenAiDelta);
}

/// Creates interceptors for the backends it recognizes.
pub trait InterceptorFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn should_intercept(&self, backend_url: &str) -> bool;

    fn create(&self) -> Box<dyn MarkupInterceptor>;
}

/// Ordered list of interceptor factories, resolved once per backend.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    factories: Vec<Arc<dyn InterceptorFactory>>,
}

impl InterceptorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every interceptor shipped in this crate.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new().with(Arc::new(zhipu::ZhipuInterceptorFactory))
    }

    #[must_use]
    pub fn with(mut self, factory: Arc<dyn InterceptorFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// First factory that claims `backend_url`.
    #[must_use]
    pub fn resolve(&self, backend_url: &str) -> Option<Arc<dyn InterceptorFactory>> {
        self.factories
            .iter()
            .find(|factory| factory.should_intercept(backend_url))
            .cloned()
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<Arc<dyn InterceptorFactory>> {
        self.factories
            .iter()
            .find(|factory| factory.name() == name)
            .cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.iter().map(|factory| factory.name())
    }
}

impl std::fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
