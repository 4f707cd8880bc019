use chrono::Utc;
use log::{error, info, warn};

use crate::BatchError;

use super::{
    build_name,
    execution::{BatchStatus, ExitStatus, JobExecution, JobParameters},
    repository::JobRepository,
    step::Step,
};

/// Type alias for job execution results.
type JobResult<T> = Result<T, BatchError>;

/// Represents a job that can be executed.
///
/// A job is a sequence of steps run in order against a single [`JobExecution`].
///
/// Running a job is split in two phases so that another thread can hold the
/// execution's cancellation token before any step starts:
///
/// ```rust
/// use chunk_batch::core::{
///     execution::{BatchStatus, JobParameters},
///     job::{Job, JobBuilder},
///     repository::InMemoryJobRepository,
///     step::StepBuilder,
/// };
/// use chunk_batch::item::list::{ListItemReader, ListItemWriter};
///
/// # fn main() -> Result<(), chunk_batch::BatchError> {
/// let repository = InMemoryJobRepository::new();
/// let reader = ListItemReader::new(vec!["a", "b"]);
/// let writer = ListItemWriter::new();
/// let step = StepBuilder::new("copy")
///     .items(&reader, &writer)
///     .repository(&repository)
///     .build()?;
/// let job = JobBuilder::new(&repository).start(&step).build();
///
/// let mut execution = job.create_execution(&JobParameters::new())?;
/// let _stop_handle = execution.cancellation_token();
/// job.execute(&mut execution)?;
///
/// assert_eq!(execution.status, BatchStatus::Completed);
/// # Ok(())
/// # }
/// ```
pub trait Job {
    fn get_name(&self) -> &str;

    /// Creates a new execution of this job for `parameters`.
    fn create_execution(&self, parameters: &JobParameters) -> JobResult<JobExecution>;

    /// Runs every step against `job_execution`.
    ///
    /// # Returns
    /// - `Ok(())` when every step completed
    /// - `Err(BatchError::Interrupted)` when the job was stopped
    /// - `Err(_)` with the error of the first failing step
    fn execute(&self, job_execution: &mut JobExecution) -> JobResult<()>;

    /// Creates an execution and runs it.
    fn run(&self, parameters: &JobParameters) -> JobResult<JobExecution> {
        let mut job_execution = self.create_execution(parameters)?;
        self.execute(&mut job_execution)?;
        Ok(job_execution)
    }
}

/// Job running its steps sequentially and stopping at the first one that
/// does not complete.
pub struct SimpleJob<'a> {
    name: String,
    restartable: bool,
    repository: &'a dyn JobRepository,
    steps: Vec<&'a dyn Step>,
}

impl Job for SimpleJob<'_> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn create_execution(&self, parameters: &JobParameters) -> JobResult<JobExecution> {
        self.repository
            .create_job_execution(&self.name, self.restartable, parameters)
    }

    fn execute(&self, job_execution: &mut JobExecution) -> JobResult<()> {
        info!("Start of job: {}, id: {}", self.name, job_execution.id);

        job_execution.set_status(BatchStatus::Started)?;
        job_execution.start_time = Some(Utc::now());
        job_execution.exit_status = ExitStatus::executing();
        if let Err(error) = self.repository.update_job_execution(job_execution) {
            return self.fail(job_execution, error);
        }

        let mut outcome = Ok(());

        for step in &self.steps {
            if job_execution.is_stop_requested() {
                outcome = Err(BatchError::Interrupted(format!(
                    "job {} stopped before step {}",
                    self.name,
                    step.get_name()
                )));
                break;
            }

            let mut step_execution = job_execution.create_step_execution(step.get_name());
            let result = step.execute(&mut step_execution);
            job_execution.add_step_execution(step_execution);

            if let Err(error) = result {
                outcome = Err(error);
                break;
            }
        }

        let finished = self.finish(job_execution, &outcome);

        info!(
            "End of job: {}, id: {}, status: {}",
            self.name, job_execution.id, job_execution.status
        );

        finished.and(outcome)
    }
}

impl SimpleJob<'_> {
    /// Moves the job execution to its terminal status and persists it.
    ///
    /// When a status cannot be persisted the job ends `FAILED` with the
    /// repository error instead.
    fn finish(&self, job_execution: &mut JobExecution, outcome: &JobResult<()>) -> JobResult<()> {
        let finished = match outcome {
            Ok(()) => self.finalize(job_execution, BatchStatus::Completed, ExitStatus::completed()),
            Err(error) if error.is_interrupted() => {
                warn!("Job {} stopped: {}", self.name, error);
                self.mark_stopping(job_execution).and_then(|_| {
                    let exit_status = ExitStatus::stopped().with_description(error.to_string());
                    self.finalize(job_execution, BatchStatus::Stopped, exit_status)
                })
            }
            Err(error) => {
                error!("Job {} failed: {}", self.name, error);
                let exit_status = ExitStatus::failed().with_description(error.to_string());
                self.finalize(job_execution, BatchStatus::Failed, exit_status)
            }
        };

        match finished {
            Ok(()) => Ok(()),
            Err(error) => self.fail(job_execution, error),
        }
    }

    fn mark_stopping(&self, job_execution: &mut JobExecution) -> JobResult<()> {
        job_execution.set_status(BatchStatus::Stopping)?;
        self.repository.update_job_execution(job_execution)
    }

    /// Persists the terminal status first, and only then applies it in memory.
    fn finalize(
        &self,
        job_execution: &mut JobExecution,
        status: BatchStatus,
        exit_status: ExitStatus,
    ) -> JobResult<()> {
        let mut terminal = job_execution.clone();
        terminal.set_status(status)?;
        terminal.exit_status = exit_status;
        terminal.end_time = Some(Utc::now());

        self.repository.update_job_execution(&terminal)?;
        *job_execution = terminal;
        Ok(())
    }

    fn fail(&self, job_execution: &mut JobExecution, cause: BatchError) -> JobResult<()> {
        error!("Job {} failed: {}", self.name, cause);

        if let Err(error) = job_execution.set_status(BatchStatus::Failed) {
            error!("Unable to mark job {} as failed: {}", self.name, error);
        }
        job_execution.exit_status = ExitStatus::failed().with_description(cause.to_string());
        job_execution.end_time = Some(Utc::now());

        if let Err(error) = self.repository.update_job_execution(job_execution) {
            error!("Unable to persist failure of job {}: {}", self.name, error);
        }

        Err(cause)
    }
}

/// Builder for [`SimpleJob`].
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    restartable: bool,
    repository: &'a dyn JobRepository,
    /// Steps to be executed, in order
    steps: Vec<&'a dyn Step>,
}

impl<'a> JobBuilder<'a> {
    pub fn new(repository: &'a dyn JobRepository) -> Self {
        Self {
            name: None,
            restartable: true,
            repository,
            steps: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> JobBuilder<'a> {
        self.name = Some(name.to_owned());
        self
    }

    /// Whether a stopped or failed instance of this job may run again. Defaults to `true`.
    pub fn restartable(mut self, restartable: bool) -> JobBuilder<'a> {
        self.restartable = restartable;
        self
    }

    /// Sets the first step of the job. Same as [`JobBuilder::next`].
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> SimpleJob<'a> {
        SimpleJob {
            name: self.name.unwrap_or_else(build_name),
            restartable: self.restartable,
            repository: self.repository,
            steps: self.steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            execution::{JobParameter, StepExecution},
            repository::InMemoryJobRepository,
            step::StepBuilder,
        },
        item::list::{ListItemReader, ListItemWriter},
    };

    struct FailingStep;

    impl Step for FailingStep {
        fn get_name(&self) -> &str {
            "failing"
        }

        fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
            step_execution.set_status(BatchStatus::Started)?;
            step_execution.set_status(BatchStatus::Failed)?;
            Err(BatchError::step_failed(
                "failing",
                BatchError::ItemReader("corrupted input".to_owned()),
            ))
        }
    }

    #[test]
    fn job_should_run_its_steps_in_order() -> anyhow::Result<()> {
        let repository = InMemoryJobRepository::new();
        let first_reader = ListItemReader::new(vec![1, 2, 3]);
        let second_reader = ListItemReader::new(vec![4]);
        let writer = ListItemWriter::new();
        let first = StepBuilder::new("first")
            .items(&first_reader, &writer)
            .repository(&repository)
            .chunk(2)
            .build()?;
        let second = StepBuilder::new("second")
            .items(&second_reader, &writer)
            .repository(&repository)
            .build()?;
        let job = JobBuilder::new(&repository)
            .name("two-steps")
            .start(&first)
            .next(&second)
            .build();

        let execution = job.run(&JobParameters::new())?;

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.exit_status.exit_code, "COMPLETED");
        let names: Vec<&str> = execution
            .step_executions()
            .iter()
            .map(|s| s.step_name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(writer.get_items(), vec![1, 2, 3, 4]);

        let stored = repository.get_job_execution(execution.id)?;
        assert_eq!(stored.map(|e| e.status), Some(BatchStatus::Completed));
        Ok(())
    }

    #[test]
    fn failing_step_should_fail_the_job_and_skip_the_rest() -> anyhow::Result<()> {
        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1]);
        let writer = ListItemWriter::new();
        let never_run = StepBuilder::new("never-run")
            .items(&reader, &writer)
            .repository(&repository)
            .build()?;
        let job = JobBuilder::new(&repository)
            .start(&FailingStep)
            .next(&never_run)
            .build();

        let mut execution = job.create_execution(&JobParameters::new())?;
        let result = job.execute(&mut execution);

        assert!(matches!(result, Err(BatchError::StepFailed { .. })));
        assert_eq!(execution.status, BatchStatus::Failed);
        assert!(execution.exit_status.exit_description.contains("corrupted input"));
        assert_eq!(execution.step_executions().len(), 1);
        assert!(writer.get_items().is_empty());
        Ok(())
    }

    #[test]
    fn stop_requested_before_execute_should_stop_the_job() -> anyhow::Result<()> {
        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1, 2]);
        let writer = ListItemWriter::new();
        let step = StepBuilder::new("step")
            .items(&reader, &writer)
            .repository(&repository)
            .build()?;
        let job = JobBuilder::new(&repository).start(&step).build();

        let mut execution = job.create_execution(&JobParameters::new())?;
        execution.stop();
        let result = job.execute(&mut execution);

        assert!(result.is_err_and(|error| error.is_interrupted()));
        assert_eq!(execution.status, BatchStatus::Stopped);
        assert!(execution.step_executions().is_empty());
        Ok(())
    }

    #[test]
    fn non_restartable_job_should_refuse_a_second_run() -> anyhow::Result<()> {
        let repository = InMemoryJobRepository::new();
        let job = JobBuilder::new(&repository)
            .name("once")
            .restartable(false)
            .start(&FailingStep)
            .build();
        let parameters = JobParameters::new().with("date", JobParameter::String("2024-01-01".to_owned()));

        assert!(job.run(&parameters).is_err());

        let result = job.create_execution(&parameters);
        assert!(matches!(result, Err(BatchError::JobRestart(_))));
        Ok(())
    }
}
