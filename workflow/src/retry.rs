//! Per-step retry with exponential backoff

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay_ms: u64,

    /// Cap on the computed delay
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt
    pub backoff_multiplier: f64,

    /// Jitter as a fraction of the delay (0.1 = ±10%)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 2000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Retry executor for workflow steps
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from a config
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a policy with default settings
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Delay before the next retry, given how many already ran
    ///
    /// The base delay grows by the configured multiplier up to the cap.
    /// The jitter fraction then scales it by a random factor in
    /// `[1 − jitter, 1 + jitter]`, spreading simultaneous retries apart
    /// so a recovering provider is not hit by every waiting step at
    /// once.
    pub fn delay_before(&self, retries_so_far: u32) -> Duration {
        let growth = self.config.backoff_multiplier.powi(retries_so_far as i32);
        let capped =
            (self.config.initial_delay_ms as f64 * growth).min(self.config.max_delay_ms as f64);

        let spread = 1.0 + self.config.jitter_factor * (2.0 * rand::random::<f64>() - 1.0);
        Duration::from_millis((capped * spread).max(0.0) as u64)
    }

    /// Attempts made in total, including the first
    pub fn total_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }

    /// Execute an operation, retrying on any error until the budget runs
    /// out
    ///
    /// Steps execute at least once; the orchestrator contract makes every
    /// error retryable at this level, and the store's conditional updates
    /// turn duplicate executions into no-ops.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: F,
        operation_name: &str,
    ) -> std::result::Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        info!(step = operation_name, retries, "Step recovered after backoff");
                    }
                    return Ok(value);
                }
                Err(err) if retries < self.config.max_retries => {
                    let delay = self.delay_before(retries);
                    retries += 1;
                    warn!(
                        step = operation_name,
                        retry = retries,
                        budget = self.config.max_retries,
                        "Step failed ({}); backing off {:?}",
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(
                        step = operation_name,
                        "Step failed with retry budget spent: {}", err
                    );
                    return Err(err);
                }
            }
        }
    }
}
