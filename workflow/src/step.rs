//! Named, cached workflow steps
//!
//! A workflow run executes named steps in declared order. Each completed
//! step's result is recorded in the step log keyed by (run id, step
//! name); when the run is re-executed after a crash or orchestrator
//! retry, completed steps replay their recorded result instead of
//! running again. Steps themselves execute at least once and may run
//! more than once across process deaths, so everything a step writes
//! must go through a conditional update.

use crate::{
    error::{Error, Result},
    retry::RetryPolicy,
};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Step log: completed step results keyed by (run id, step name)
#[derive(Default)]
pub struct StepLog {
    entries: DashMap<(String, String), serde_json::Value>,
}

impl StepLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded result for a step, if the step completed
    pub fn get(&self, run_id: &str, step: &str) -> Option<serde_json::Value> {
        self.entries
            .get(&(run_id.to_string(), step.to_string()))
            .map(|v| v.clone())
    }

    /// Record a completed step's result
    pub fn put(&self, run_id: &str, step: &str, value: serde_json::Value) {
        self.entries
            .insert((run_id.to_string(), step.to_string()), value);
    }

    /// Number of completed steps across all runs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no step has completed yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One workflow run
#[derive(Clone)]
pub struct Run {
    run_id: String,
    log: Arc<StepLog>,
    retry: RetryPolicy,
}

impl Run {
    /// Create a run against a step log
    pub fn new(run_id: impl Into<String>, log: Arc<StepLog>) -> Self {
        Self {
            run_id: run_id.into(),
            log,
            retry: RetryPolicy::with_defaults(),
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// This run's id
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Execute a named step, replaying its recorded result if the step
    /// already completed in this run
    ///
    /// The operation is retried per the run's policy; when the budget is
    /// exhausted the whole run fails and stays retryable at this step.
    pub async fn step<T, F, Fut, E>(&self, name: &str, operation: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Some(cached) = self.log.get(&self.run_id, name) {
            tracing::debug!(run_id = %self.run_id, step = name, "Replaying recorded step result");
            return Ok(serde_json::from_value(cached)?);
        }

        let result = self
            .retry
            .execute(operation, name)
            .await
            .map_err(|e| Error::StepFailed {
                step: name.to_string(),
                attempts: self.retry.total_attempts(),
                message: e.to_string(),
            })?;

        self.log.put(&self.run_id, name, serde_json::to_value(&result)?);
        tracing::debug!(run_id = %self.run_id, step = name, "Step completed");

        Ok(result)
    }

    /// Durable sleep: skipped entirely when the run already slept here
    pub async fn sleep(&self, name: &str, duration: Duration) -> Result<()> {
        if self.log.get(&self.run_id, name).is_some() {
            return Ok(());
        }
        tokio::time::sleep(duration).await;
        self.log.put(&self.run_id, name, serde_json::Value::Null);
        Ok(())
    }
}
