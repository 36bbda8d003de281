//! Error types for the workflow runtime

use thiserror::Error;

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Workflow errors
#[derive(Error, Debug)]
pub enum Error {
    /// A step exhausted its retry budget
    #[error("Step {step} failed after {attempts} attempts: {message}")]
    StepFailed {
        /// Step name
        step: String,
        /// Attempts made, including the first
        attempts: u32,
        /// Last error message
        message: String,
    },

    /// Step result could not be serialized or replayed
    #[error("Step result serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
