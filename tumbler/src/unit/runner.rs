//! In-process attempt/timeout layer over an execution backend.

use super::{RetryConfig, UnitOfWork, UnitRunner};
use crate::backend::ExecutionBackend;
use crate::cancellation::CancellationToken;
use crate::errors::{TumblerError, UnitExecutionError, UnitFailure};
use crate::events::{EventSink, NoOpEventSink, UNIT_ATTEMPT_FAILED, UNIT_RETRYING};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs units through an [`ExecutionBackend`] with bounded attempts.
///
/// Every attempt is bounded by the configured hard timeout, and every wait
/// (the attempt itself and the backoff sleep) is raced against the
/// cancellation token. An attempt that loses the race is dropped, which
/// leaves cleanup to the backend's drop handling.
pub struct RetryingUnitRunner {
    backend: Arc<dyn ExecutionBackend>,
    config: RetryConfig,
    event_sink: Arc<dyn EventSink>,
}

impl RetryingUnitRunner {
    /// Creates a runner with the default retry policy.
    #[must_use]
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            config: RetryConfig::default(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink for attempt events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

fn cancelled(unit: &UnitOfWork, token: &CancellationToken) -> TumblerError {
    TumblerError::cancelled(
        unit.name.clone(),
        token.reason().unwrap_or_else(|| "cancelled".to_string()),
    )
}

#[async_trait]
impl UnitRunner for RetryingUnitRunner {
    async fn run_unit(
        &self,
        unit: &UnitOfWork,
        token: &CancellationToken,
    ) -> Result<Vec<String>, TumblerError> {
        let timeout = self.config.attempt_timeout();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if token.is_cancelled() {
                return Err(cancelled(unit, token));
            }
            attempt += 1;
            debug!(unit = %unit.name, attempt, agent = %unit.agent, "Starting attempt");

            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => return Err(cancelled(unit, token)),
                outcome = tokio::time::timeout(timeout, self.backend.execute(unit)) => outcome,
            };

            let failure = match outcome {
                Ok(Ok(outputs)) => return Ok(outputs),
                Ok(Err(err)) if !err.is_retryable() => {
                    warn!(unit = %unit.name, attempt, error = %err, "Attempt failed, not retryable");
                    return Err(UnitExecutionError::new(
                        unit.name.clone(),
                        attempt,
                        UnitFailure::NotRetryable(err.to_string()),
                    )
                    .into());
                }
                Ok(Err(err)) => UnitFailure::Failed(err.to_string()),
                Err(_elapsed) => UnitFailure::TimedOut(timeout),
            };

            warn!(unit = %unit.name, attempt, error = %failure, "Attempt failed");
            self.event_sink.try_emit(
                UNIT_ATTEMPT_FAILED,
                Some(serde_json::json!({
                    "stage": unit.name,
                    "attempt": attempt,
                    "error": failure.to_string(),
                })),
            );

            if attempt >= max_attempts {
                return Err(UnitExecutionError::new(unit.name.clone(), attempt, failure).into());
            }

            let delay = self.config.delay_for(attempt - 1);
            self.event_sink.try_emit(
                UNIT_RETRYING,
                Some(serde_json::json!({
                    "stage": unit.name,
                    "attempt": attempt + 1,
                    "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                })),
            );

            tokio::select! {
                biased;
                () = token.cancelled() => return Err(cancelled(unit, token)),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl std::fmt::Debug for RetryingUnitRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingUnitRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
