//! Per-call timeout plus exponential backoff for model calls.

use std::time::Duration;

use tracing::warn;

use super::{ChatMessage, Completion, ModelClient};
use crate::config::ModelConfig;
use crate::error::{ModelError, OrchestratorError};
use crate::tools::ToolSchema;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            call_timeout: config.timeout(),
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2×base, 4×base, … capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// One model call bounded by `timeout`.
pub async fn complete_once(
    client: &dyn ModelClient,
    timeout: Duration,
    messages: &[ChatMessage],
    tools: &[ToolSchema],
) -> Result<Completion, ModelError> {
    match tokio::time::timeout(timeout, client.complete(messages, tools)).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout(timeout)),
    }
}

/// Call the model, retrying retryable failures with backoff. Non-retryable
/// errors and exhausted retries become [`OrchestratorError::ModelCallFailure`].
pub async fn complete_with_retry(
    client: &dyn ModelClient,
    policy: &RetryPolicy,
    messages: &[ChatMessage],
    tools: &[ToolSchema],
) -> Result<Completion, OrchestratorError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match complete_once(client, policy.call_timeout, messages, tools).await {
            Ok(completion) => return Ok(completion),
            Err(e) if e.is_retryable() && attempt <= policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    model = client.model_name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "model call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(source) => {
                return Err(OrchestratorError::ModelCallFailure {
                    attempts: attempt,
                    source,
                })
            }
        }
    }
}
