use chrono::Utc;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::BatchError;

use super::{
    build_name,
    execution::{BatchStatus, ExitStatus, StepContribution, StepExecution},
    item::{ItemProcessor, ItemReader, ItemWriter, SimpleItemProcessor, WorkUnitResult},
    policy::SimpleCompletionPolicy,
    repeat::{RepeatOperations, RepeatStatus, RepeatTemplate},
    repository::JobRepository,
    transaction::{ResourcelessTransactionManager, Transaction, TransactionManager},
};

/// Represents a step that can be executed as part of a job.
pub trait Step {
    /// Name of the step, used for the step executions it produces.
    fn get_name(&self) -> &str;

    /// Executes the step.
    ///
    /// # Returns
    /// - `Ok(())`: the step completed, `step_execution` is `COMPLETED`
    /// - `Err(BatchError::Interrupted)`: the step was stopped, `step_execution` is `STOPPED`
    /// - `Err(_)`: the step failed, `step_execution` is `FAILED`
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
}

/// Step that reads and writes items in transactional chunks.
///
/// Two nested repeat loops drive the work: the step operations produce one
/// chunk per iteration, and the chunk operations run one unit of work per
/// iteration inside the chunk transaction. Both loops check the step's
/// cancellation token at every iteration boundary, so a stop request is
/// honoured after at most one more item.
///
/// A chunk either commits entirely, or is rolled back and leaves no trace in
/// the step execution counters.
pub struct ChunkOrientedStep<'a> {
    name: String,
    processor: Box<dyn ItemProcessor + 'a>,
    repository: &'a dyn JobRepository,
    transaction_manager: Box<dyn TransactionManager + 'a>,
    chunk_operations: Box<dyn RepeatOperations + 'a>,
    step_operations: Box<dyn RepeatOperations + 'a>,
}

impl Step for ChunkOrientedStep<'_> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        if step_execution.status != BatchStatus::Starting {
            return Err(BatchError::IllegalStatusTransition {
                from: step_execution.status,
                to: BatchStatus::Started,
            });
        }

        info!(
            "Start of step: {}, job execution: {}",
            self.name, step_execution.job_execution_id
        );

        let interrupt = step_execution.cancellation_token();

        let result = self
            .open(step_execution)
            .and_then(|_| self.run_chunks(step_execution, &interrupt));

        let result = self.close(result);

        let outcome = self.finish(step_execution, result);

        info!(
            "End of step: {}, status: {}, read: {}, write: {}, commit: {}, rollback: {}",
            self.name,
            step_execution.status,
            step_execution.read_count,
            step_execution.write_count,
            step_execution.commit_count,
            step_execution.rollback_count
        );

        outcome
    }
}

impl ChunkOrientedStep<'_> {
    fn open(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        if step_execution.id.is_none() {
            self.repository.add_step_execution(step_execution)?;
        }

        step_execution.set_status(BatchStatus::Started)?;
        step_execution.start_time = Some(Utc::now());
        self.repository.update_step_execution(step_execution)?;

        self.processor.open()
    }

    fn run_chunks(
        &self,
        step_execution: &mut StepExecution,
        interrupt: &CancellationToken,
    ) -> Result<RepeatStatus, BatchError> {
        self.step_operations.execute(interrupt, &mut |_| {
            self.execute_chunk(step_execution, interrupt)
        })
    }

    /// Runs one chunk inside its own transaction.
    ///
    /// Returns `Finished` once the processor reported that no items are left.
    fn execute_chunk(
        &self,
        step_execution: &mut StepExecution,
        interrupt: &CancellationToken,
    ) -> Result<RepeatStatus, BatchError> {
        let transaction = self.transaction_manager.begin()?;
        let mut contribution = StepContribution::default();

        debug!("Start of chunk, transaction {}", transaction.id());

        let result = self
            .chunk_operations
            .execute(interrupt, &mut |_| match self.processor.process()? {
                WorkUnitResult::ItemProcessed => {
                    contribution.inc_read_count();
                    contribution.inc_write_count();
                    Ok(RepeatStatus::Continuable)
                }
                WorkUnitResult::NoMoreItems => Ok(RepeatStatus::Finished),
            })
            .and_then(|status| {
                // last chance to discard the chunk before it becomes durable
                if interrupt.is_cancelled() {
                    return Err(BatchError::Interrupted(
                        "stop requested before chunk commit".to_owned(),
                    ));
                }
                self.processor.flush().map(|_| status)
            });

        match result {
            Ok(status) => {
                self.commit(step_execution, transaction, &contribution)?;
                debug!(
                    "End of chunk: {} items committed{}",
                    contribution.write_count,
                    if status == RepeatStatus::Finished {
                        ", no more items"
                    } else {
                        ""
                    }
                );
                Ok(status)
            }
            Err(error) => {
                let error = Self::with_interrupt_precedence(error, interrupt);

                let stopping = if error.is_interrupted() {
                    self.mark_stopping(step_execution)
                } else {
                    Ok(())
                };

                warn!(
                    "Rolling back chunk of {} items: {}",
                    contribution.read_count, error
                );
                let rollback = self.rollback(step_execution, transaction);

                stopping.and(rollback)?;
                Err(error)
            }
        }
    }

    fn commit(
        &self,
        step_execution: &mut StepExecution,
        transaction: Transaction,
        contribution: &StepContribution,
    ) -> Result<(), BatchError> {
        if let Err(error) = self.transaction_manager.commit(transaction) {
            error!("Commit failed for step {}: {}", self.name, error);
            step_execution.rollback_count += 1;
            if let Err(clear_error) = self.processor.clear() {
                warn!("Non-fatal error: {}", clear_error);
            }
            return Err(error);
        }

        step_execution.apply(contribution);
        self.repository.update_step_execution(step_execution)
    }

    fn rollback(
        &self,
        step_execution: &mut StepExecution,
        transaction: Transaction,
    ) -> Result<(), BatchError> {
        step_execution.rollback_count += 1;

        let rollback = self.transaction_manager.rollback(transaction);
        let clear = self.processor.clear();

        rollback.and(clear)
    }

    /// Records that a stop request has been observed, before it is fully applied.
    fn mark_stopping(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        if step_execution.status != BatchStatus::Started {
            return Ok(());
        }
        warn!("Stop requested for step: {}", self.name);
        step_execution.set_status(BatchStatus::Stopping)?;
        self.repository.update_step_execution(step_execution)
    }

    /// An I/O failure racing a stop request is reported as an interruption.
    fn with_interrupt_precedence(error: BatchError, interrupt: &CancellationToken) -> BatchError {
        match error {
            BatchError::ItemReader(_) | BatchError::ItemWriter(_) if interrupt.is_cancelled() => {
                BatchError::Interrupted(format!("stop requested while failing with: {error}"))
            }
            other => other,
        }
    }

    fn close(&self, result: Result<RepeatStatus, BatchError>) -> Result<RepeatStatus, BatchError> {
        match self.processor.close() {
            Ok(()) => result,
            Err(error) if result.is_ok() => Err(error),
            Err(error) => {
                warn!("Non-fatal error: {}", error);
                result
            }
        }
    }

    /// Moves the step execution to its terminal status and persists it.
    fn finish(
        &self,
        step_execution: &mut StepExecution,
        result: Result<RepeatStatus, BatchError>,
    ) -> Result<(), BatchError> {
        match result {
            Ok(_) => {
                match self.finalize(step_execution, BatchStatus::Completed, ExitStatus::completed())
                {
                    Ok(()) => Ok(()),
                    Err(error) => self.fail(step_execution, error),
                }
            }
            Err(error) if error.is_interrupted() => {
                if let Err(repository_error) = self.mark_stopping(step_execution) {
                    return self.fail(step_execution, repository_error);
                }
                let exit_status = ExitStatus::stopped().with_description(error.to_string());
                match self.finalize(step_execution, BatchStatus::Stopped, exit_status) {
                    Ok(()) => Err(error),
                    Err(repository_error) => self.fail(step_execution, repository_error),
                }
            }
            Err(error) => self.fail(step_execution, error),
        }
    }

    /// Persists the terminal status first, and only then applies it in memory.
    fn finalize(
        &self,
        step_execution: &mut StepExecution,
        status: BatchStatus,
        exit_status: ExitStatus,
    ) -> Result<(), BatchError> {
        let mut terminal = step_execution.clone();
        terminal.set_status(status)?;
        terminal.exit_status = exit_status;
        terminal.end_time = Some(Utc::now());

        self.repository.update_step_execution(&terminal)?;
        *step_execution = terminal;
        Ok(())
    }

    fn fail(&self, step_execution: &mut StepExecution, cause: BatchError) -> Result<(), BatchError> {
        error!("Step {} failed: {}", self.name, cause);

        // never registered nor started: there is no run to finalize
        if step_execution.status == BatchStatus::Starting {
            return Err(BatchError::step_failed(&self.name, cause));
        }

        if let Err(error) = step_execution.set_status(BatchStatus::Failed) {
            error!("Unable to mark step {} as failed: {}", self.name, error);
        }
        step_execution.exit_status = ExitStatus::failed().with_description(cause.to_string());
        step_execution.end_time = Some(Utc::now());

        if step_execution.id.is_some() {
            if let Err(error) = self.repository.update_step_execution(step_execution) {
                error!("Unable to persist failure of step {}: {}", self.name, error);
            }
        }

        Err(BatchError::step_failed(&self.name, cause))
    }
}

/// Builder for [`ChunkOrientedStep`].
///
/// # Example
///
/// ```rust
/// use chunk_batch::core::{
///     job::{Job, JobBuilder},
///     repository::InMemoryJobRepository,
///     step::StepBuilder,
/// };
/// use chunk_batch::core::execution::JobParameters;
/// use chunk_batch::item::list::{ListItemReader, ListItemWriter};
///
/// # fn main() -> Result<(), chunk_batch::BatchError> {
/// let repository = InMemoryJobRepository::new();
/// let reader = ListItemReader::new(vec![1, 2, 3, 4, 5]);
/// let writer = ListItemWriter::new();
///
/// let step = StepBuilder::new("copy")
///     .items(&reader, &writer)
///     .repository(&repository)
///     .chunk(2)
///     .build()?;
///
/// let job = JobBuilder::new(&repository).name("copy-job").start(&step).build();
/// let execution = job.run(&JobParameters::new())?;
///
/// assert_eq!(execution.step_executions()[0].write_count, 5);
/// assert_eq!(writer.get_items(), vec![1, 2, 3, 4, 5]);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct StepBuilder<'a> {
    name: Option<String>,
    processor: Option<Box<dyn ItemProcessor + 'a>>,
    repository: Option<&'a dyn JobRepository>,
    transaction_manager: Option<Box<dyn TransactionManager + 'a>>,
    commit_interval: Option<usize>,
    chunk_operations: Option<Box<dyn RepeatOperations + 'a>>,
    step_operations: Option<Box<dyn RepeatOperations + 'a>>,
}

impl<'a> StepBuilder<'a> {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
            ..Self::default()
        }
    }

    /// Reads from `reader` and writes every item read to `writer`.
    pub fn items<T, R, W>(mut self, reader: &'a R, writer: &'a W) -> Self
    where
        T: 'a,
        R: ItemReader<T> + 'a,
        W: ItemWriter<T> + 'a,
    {
        self.processor = Some(Box::new(SimpleItemProcessor::new(reader, writer)));
        self
    }

    /// Uses a custom unit of work instead of a reader/writer pair.
    pub fn item_processor(mut self, processor: impl ItemProcessor + 'a) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    pub fn repository(mut self, repository: &'a dyn JobRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Defaults to a [`ResourcelessTransactionManager`].
    pub fn transaction_manager(mut self, transaction_manager: impl TransactionManager + 'a) -> Self {
        self.transaction_manager = Some(Box::new(transaction_manager));
        self
    }

    /// Sets the commit interval: the number of items per chunk.
    pub fn chunk(mut self, commit_interval: usize) -> Self {
        self.commit_interval = Some(commit_interval);
        self
    }

    /// Overrides the item-level loop. Takes precedence over [`StepBuilder::chunk`].
    pub fn chunk_operations(mut self, operations: impl RepeatOperations + 'a) -> Self {
        self.chunk_operations = Some(Box::new(operations));
        self
    }

    /// Overrides the chunk-level loop, which by default runs until the input is exhausted.
    pub fn step_operations(mut self, operations: impl RepeatOperations + 'a) -> Self {
        self.step_operations = Some(Box::new(operations));
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a>, BatchError> {
        let processor = self.processor.ok_or_else(|| {
            BatchError::Configuration("a reader and a writer are required to build a step".to_owned())
        })?;
        let repository = self.repository.ok_or_else(|| {
            BatchError::Configuration("a job repository is required to build a step".to_owned())
        })?;

        let chunk_operations: Box<dyn RepeatOperations + 'a> =
            match (self.chunk_operations, self.commit_interval) {
                (Some(operations), _) => operations,
                (None, Some(interval)) => Box::new(RepeatTemplate::with_completion_policy(
                    SimpleCompletionPolicy::new(interval)?,
                )),
                (None, None) => Box::new(RepeatTemplate::new()),
            };

        Ok(ChunkOrientedStep {
            name: self.name.unwrap_or_else(build_name),
            processor,
            repository,
            transaction_manager: self
                .transaction_manager
                .unwrap_or_else(|| Box::new(ResourcelessTransactionManager::new())),
            chunk_operations,
            step_operations: self
                .step_operations
                .unwrap_or_else(|| Box::new(RepeatTemplate::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{
        core::{
            execution::{JobExecution, JobParameters},
            item::ItemReaderResult,
            policy::SimpleCompletionPolicy,
            repository::InMemoryJobRepository,
        },
        item::list::{ListItemReader, ListItemWriter},
    };

    fn job_execution(repository: &InMemoryJobRepository) -> Result<JobExecution, BatchError> {
        repository.create_job_execution("job", true, &JobParameters::new())
    }

    struct EndlessReader {
        count: Cell<usize>,
    }

    impl ItemReader<usize> for EndlessReader {
        fn read(&self) -> ItemReaderResult<usize> {
            self.count.set(self.count.get() + 1);
            Ok(Some(self.count.get()))
        }
    }

    #[test]
    fn build_should_require_reader_and_writer() {
        let repository = InMemoryJobRepository::new();

        let result = StepBuilder::new("step").repository(&repository).build();

        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn build_should_require_repository() {
        let reader = ListItemReader::new(vec![1]);
        let writer = ListItemWriter::new();

        let result = StepBuilder::new("step").items(&reader, &writer).build();

        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn zero_commit_interval_should_fail_fast() {
        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1]);
        let writer = ListItemWriter::new();

        let result = StepBuilder::new("step")
            .items(&reader, &writer)
            .repository(&repository)
            .chunk(0)
            .build();

        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn unnamed_step_should_get_a_generated_name() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1]);
        let writer = ListItemWriter::new();

        let step = StepBuilder::default()
            .items(&reader, &writer)
            .repository(&repository)
            .build()?;

        assert_eq!(step.get_name().len(), 8);
        Ok(())
    }

    #[test]
    fn exhausted_input_should_complete_the_step() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1, 2, 3, 4, 5]);
        let writer = ListItemWriter::new();
        let step = StepBuilder::new("step")
            .items(&reader, &writer)
            .repository(&repository)
            .chunk(2)
            .build()?;
        let mut step_execution = job_execution(&repository)?.create_step_execution("step");

        step.execute(&mut step_execution)?;

        assert_eq!(step_execution.status, BatchStatus::Completed);
        assert_eq!(step_execution.exit_status, ExitStatus::completed());
        assert_eq!(step_execution.read_count, 5);
        assert_eq!(step_execution.write_count, 5);
        assert_eq!(step_execution.commit_count, 3);
        assert_eq!(step_execution.rollback_count, 0);
        assert!(step_execution.start_time.is_some());
        assert!(step_execution.end_time.is_some());
        assert_eq!(writer.get_items(), vec![1, 2, 3, 4, 5]);

        let stored = step_execution
            .id
            .map(|id| repository.get_step_execution(id))
            .transpose()?
            .flatten();
        assert_eq!(stored.map(|s| s.status), Some(BatchStatus::Completed));
        Ok(())
    }

    #[test]
    fn bounded_step_operations_should_stop_after_their_chunks() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let reader = EndlessReader {
            count: Cell::new(0),
        };
        let writer = ListItemWriter::new();
        let step = StepBuilder::new("step")
            .items(&reader, &writer)
            .repository(&repository)
            .chunk(3)
            .step_operations(RepeatTemplate::with_completion_policy(
                SimpleCompletionPolicy::new(2)?,
            ))
            .build()?;
        let mut step_execution = job_execution(&repository)?.create_step_execution("step");

        step.execute(&mut step_execution)?;

        assert_eq!(step_execution.status, BatchStatus::Completed);
        assert_eq!(step_execution.commit_count, 2);
        assert_eq!(step_execution.write_count, 6);
        Ok(())
    }

    #[test]
    fn already_finished_execution_should_be_rejected() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1]);
        let writer = ListItemWriter::new();
        let step = StepBuilder::new("step")
            .items(&reader, &writer)
            .repository(&repository)
            .build()?;
        let mut step_execution = job_execution(&repository)?.create_step_execution("step");
        step.execute(&mut step_execution)?;

        let result = step.execute(&mut step_execution);

        assert!(matches!(
            result,
            Err(BatchError::IllegalStatusTransition {
                from: BatchStatus::Completed,
                ..
            })
        ));
        assert_eq!(step_execution.status, BatchStatus::Completed);
        Ok(())
    }

    #[test]
    fn stop_before_start_should_stop_without_reading() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let reader = EndlessReader {
            count: Cell::new(0),
        };
        let writer = ListItemWriter::new();
        let step = StepBuilder::new("step")
            .items(&reader, &writer)
            .repository(&repository)
            .build()?;
        let mut step_execution = job_execution(&repository)?.create_step_execution("step");
        step_execution.stop();

        let result = step.execute(&mut step_execution);

        assert!(result.is_err_and(|error| error.is_interrupted()));
        assert_eq!(step_execution.status, BatchStatus::Stopped);
        assert_eq!(step_execution.exit_status.exit_code, "STOPPED");
        assert_eq!(reader.count.get(), 0);
        assert_eq!(step_execution.rollback_count, 0);
        Ok(())
    }
}
