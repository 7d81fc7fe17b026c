use parking_lot::Mutex;
use serde::Serialize;

use crate::protocol::openai_chat::OpenAiUsage;

/// One response's usage after the token scale factor is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScaledUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
}

/// Process-wide totals exposed on `/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
}

/// Shared usage accumulator.
///
/// Each response records once, at finalization. The lock only guards the
/// counter update and is never held across I/O.
#[derive(Debug)]
pub struct UsageAggregator {
    scale: f64,
    totals: Mutex<UsageTotals>,
}

impl UsageAggregator {
    #[must_use]
    pub fn new(scale: f64) -> Self {
        Self {
            scale,
            totals: Mutex::new(UsageTotals::default()),
        }
    }

    #[must_use]
    pub fn scale_factor(&self) -> f64 {
        self.scale
    }

    /// Apply the scale factor to every field; fractions are truncated.
    #[must_use]
    pub fn scale(&self, usage: Option<&OpenAiUsage>) -> ScaledUsage {
        let Some(usage) = usage else {
            return ScaledUsage::default();
        };
        ScaledUsage {
            input_tokens: scale_count(usage.prompt_tokens, self.scale),
            output_tokens: scale_count(usage.completion_tokens, self.scale),
            cached_tokens: scale_count(usage.cached_tokens(), self.scale),
            total_tokens: scale_count(usage.total_tokens, self.scale),
        }
    }

    /// Scale `usage` and fold it into the process-wide totals.
    pub fn record(&self, usage: Option<&OpenAiUsage>) -> ScaledUsage {
        let scaled = self.scale(usage);
        let mut totals = self.totals.lock();
        totals.requests += 1;
        totals.prompt_tokens = totals.prompt_tokens.saturating_add(scaled.input_tokens);
        totals.completion_tokens = totals
            .completion_tokens
            .saturating_add(scaled.output_tokens);
        totals.cached_tokens = totals.cached_tokens.saturating_add(scaled.cached_tokens);
        totals.total_tokens = totals.total_tokens.saturating_add(scaled.total_tokens);
        scaled
    }

    #[must_use]
    pub fn snapshot(&self) -> UsageTotals {
        *self.totals.lock()
    }
}

impl Default for UsageAggregator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn scale_count(count: u64, scale: f64) -> u64 {
    (count as f64 * scale) as u64
}
