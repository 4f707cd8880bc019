use thiserror::Error;

use crate::core::execution::BatchStatus;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    #[error("ItemReader from: {0}")]
    ItemReader(String),

    /// Cancellation was observed while the step or job was running.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Any unrecovered error other than an interruption, tagged with the step name.
    #[error("Step {step} failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<BatchError>,
    },

    #[error("Job: {0}")]
    Job(String),

    #[error("Configuration: {0}")]
    Configuration(String),

    #[error("Repository: {0}")]
    Repository(String),

    #[error("Transaction: {0}")]
    Transaction(String),

    #[error("Job execution already running: {0}")]
    JobExecutionAlreadyRunning(String),

    #[error("Job instance already complete: {0}")]
    JobInstanceAlreadyComplete(String),

    #[error("Job restart: {0}")]
    JobRestart(String),

    #[error("Illegal status transition from {from:?} to {to:?}")]
    IllegalStatusTransition { from: BatchStatus, to: BatchStatus },
}

impl BatchError {
    /// Returns `true` when this error signals a deliberate stop rather than a failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, BatchError::Interrupted(_))
    }

    /// Wraps `cause` into a [`BatchError::StepFailed`]. Interruptions are returned as is.
    pub fn step_failed(step: &str, cause: BatchError) -> BatchError {
        match cause {
            BatchError::Interrupted(_) | BatchError::StepFailed { .. } => cause,
            other => BatchError::StepFailed {
                step: step.to_owned(),
                source: Box::new(other),
            },
        }
    }
}
