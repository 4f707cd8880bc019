use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::BatchError;

/// Status of a job or step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Status of an execution prior to running.
    Starting,
    /// Status of an execution that is running.
    Started,
    /// Cancellation has been observed but not fully applied yet.
    Stopping,
    /// Status of an execution that has been stopped by request.
    Stopped,
    /// The execution has successfully completed.
    Completed,
    /// The execution has failed.
    Failed,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Stopped | BatchStatus::Completed | BatchStatus::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `STARTING -> STARTED -> {STOPPING ->} STOPPED | COMPLETED | FAILED`.
    /// An execution that never started cannot end. A failure to persist the
    /// stop itself leaves `STOPPING -> FAILED` open.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;

        matches!(
            (self, next),
            (Starting, Started)
                | (Started, Stopping)
                | (Started, Stopped)
                | (Started, Completed)
                | (Started, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// Exit code and free-text description recorded when an execution ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    fn with_code(code: &str) -> Self {
        Self {
            exit_code: code.to_owned(),
            exit_description: String::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::with_code("UNKNOWN")
    }

    pub fn executing() -> Self {
        Self::with_code("EXECUTING")
    }

    pub fn completed() -> Self {
        Self::with_code("COMPLETED")
    }

    pub fn stopped() -> Self {
        Self::with_code("STOPPED")
    }

    pub fn failed() -> Self {
        Self::with_code("FAILED")
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.exit_description = description.into();
        self
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Single typed job parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobParameter {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

/// Parameters identifying one job instance together with the job name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: JobParameter) -> Self {
        self.parameters.insert(key.to_owned(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// One logical run of a job, identified by its name and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: u64,
    pub job_name: String,
    pub parameters: JobParameters,
}

/// Record of one run of a job.
///
/// Created by a [`JobRepository`](super::repository::JobRepository). The job
/// execution owns a cancellation token; every step execution created from it
/// receives a child token, so [`JobExecution::stop`] reaches all of its steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: u64,
    pub job_instance: JobInstance,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    step_executions: Vec<StepExecution>,
    #[serde(skip)]
    interrupt: CancellationToken,
}

impl JobExecution {
    pub fn new(id: u64, job_instance: JobInstance) -> Self {
        Self {
            id,
            job_instance,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            step_executions: Vec::new(),
            interrupt: CancellationToken::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_instance.job_name
    }

    pub fn set_status(&mut self, status: BatchStatus) -> Result<(), BatchError> {
        transition(&mut self.status, status)
    }

    /// Requests every running step of this job to stop. Idempotent.
    pub fn stop(&self) {
        self.interrupt.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Handle usable from another thread to stop this job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Creates a step execution belonging to this job. The step is not yet
    /// registered with the job; see [`JobExecution::add_step_execution`].
    pub fn create_step_execution(&self, step_name: &str) -> StepExecution {
        StepExecution::new(step_name, self)
    }

    /// Takes ownership of a step execution once it has run.
    pub fn add_step_execution(&mut self, step_execution: StepExecution) {
        self.step_executions.push(step_execution);
    }

    pub fn step_executions(&self) -> &[StepExecution] {
        &self.step_executions
    }

    /// Links a restored copy to the token of the live execution.
    pub(crate) fn attach(&mut self, interrupt: CancellationToken) {
        self.interrupt = interrupt;
    }

    pub(crate) fn step_executions_mut(&mut self) -> &mut [StepExecution] {
        &mut self.step_executions
    }
}

/// Record of one step's run within a job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// Assigned by the repository when the execution is first stored.
    pub id: Option<u64>,
    pub step_name: String,
    /// Back-reference to the owning job execution.
    pub job_execution_id: u64,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Items read in committed chunks
    pub read_count: usize,
    /// Items written in committed chunks
    pub write_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    #[serde(skip)]
    interrupt: CancellationToken,
}

impl StepExecution {
    pub fn new(step_name: &str, job_execution: &JobExecution) -> Self {
        Self {
            id: None,
            step_name: step_name.to_owned(),
            job_execution_id: job_execution.id,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            start_time: None,
            end_time: None,
            read_count: 0,
            write_count: 0,
            commit_count: 0,
            rollback_count: 0,
            interrupt: job_execution.interrupt.child_token(),
        }
    }

    pub fn set_status(&mut self, status: BatchStatus) -> Result<(), BatchError> {
        transition(&mut self.status, status)
    }

    /// Requests this step to stop at its next loop boundary. Idempotent.
    pub fn stop(&self) {
        self.interrupt.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Handle usable from another thread to stop this step.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    pub(crate) fn attach(&mut self, interrupt: CancellationToken) {
        self.interrupt = interrupt;
    }

    /// Folds a committed chunk into the counters.
    pub fn apply(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.commit_count += 1;
    }
}

/// Counters accumulated by one chunk, applied to the step execution only on commit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepContribution {
    pub read_count: usize,
    pub write_count: usize,
}

impl StepContribution {
    pub fn inc_read_count(&mut self) {
        self.read_count += 1;
    }

    pub fn inc_write_count(&mut self) {
        self.write_count += 1;
    }
}

fn transition(current: &mut BatchStatus, next: BatchStatus) -> Result<(), BatchError> {
    if !current.can_transition_to(next) {
        return Err(BatchError::IllegalStatusTransition {
            from: *current,
            to: next,
        });
    }
    *current = next;
    Ok(())
}
