use crate::llm::{LlmBackend, LlmError, LlmRequest};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("llm call timed out after {0:?}")]
    Timeout(Duration),

    #[error("llm backend error: {0}")]
    Backend(#[from] LlmError),
}

#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {last}")]
pub struct RetryExhausted {
    pub attempts: u32,
    #[source]
    pub last: AnalysisError,
}

/// Per-call timeout plus bounded exponential backoff. Every attempt sends
/// the same request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub async fn call(
        &self,
        backend: &dyn LlmBackend,
        request: &LlmRequest,
        context: &str,
    ) -> Result<String, RetryExhausted> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, backend.complete(request)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => AnalysisError::Backend(e),
                Err(_) => AnalysisError::Timeout(self.call_timeout),
            };

            if attempt >= max_attempts {
                tracing::error!(
                    context = %context,
                    attempts = attempt,
                    error = %result,
                    "llm call failed, giving up"
                );
                return Err(RetryExhausted {
                    attempts: attempt,
                    last: result,
                });
            }

            let backoff = self.backoff_for(attempt);
            tracing::warn!(
                context = %context,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %result,
                "llm call failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}
