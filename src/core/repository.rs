//! Persistence boundary for execution records.
//!
//! The engine only relies on the [`JobRepository`] contract: identities are assigned
//! by the repository, and an update is visible to every reader once the call
//! returns. [`InMemoryJobRepository`] is the map-backed implementation used in tests
//! and by embedders that do not need durable storage.
//!
//! A record read back from the repository is a copy, but it shares the stop signal
//! of the live execution: calling `stop()` on it stops the running job or step.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use log::debug;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::BatchError;

use super::execution::{BatchStatus, JobExecution, JobInstance, JobParameters, StepExecution};

/// Creates and updates job and step execution records.
pub trait JobRepository: Send + Sync {
    /// Starts a new run of `job_name` with `parameters`.
    ///
    /// # Errors
    /// - [`BatchError::JobExecutionAlreadyRunning`] if the instance has a running execution
    /// - [`BatchError::JobInstanceAlreadyComplete`] if the instance already completed
    /// - [`BatchError::JobRestart`] if the job is not restartable and was already run
    fn create_job_execution(
        &self,
        job_name: &str,
        restartable: bool,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError>;

    fn update_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError>;

    /// Stores a new step execution and assigns its id.
    fn add_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;

    fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError>;

    fn get_job_execution(&self, id: u64) -> Result<Option<JobExecution>, BatchError>;

    fn get_step_execution(&self, id: u64) -> Result<Option<StepExecution>, BatchError>;

    /// Latest execution of `step_name` across every run of `job_instance_id`.
    fn get_last_step_execution(
        &self,
        job_instance_id: u64,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError>;
}

#[derive(Default)]
struct Store {
    job_instances: HashMap<u64, JobInstance>,
    job_executions: HashMap<u64, Value>,
    step_executions: HashMap<u64, Value>,
    /// Stop signals of the executions created or added through this store, by id
    job_interrupts: HashMap<u64, CancellationToken>,
    step_interrupts: HashMap<u64, CancellationToken>,
}

impl Store {
    fn job_execution(&self, value: &Value) -> Result<JobExecution, BatchError> {
        let mut job_execution: JobExecution = restore(value)?;
        if let Some(interrupt) = self.job_interrupts.get(&job_execution.id) {
            job_execution.attach(interrupt.clone());
        }
        for step_execution in job_execution.step_executions_mut() {
            self.link(step_execution);
        }
        Ok(job_execution)
    }

    fn step_execution(&self, value: &Value) -> Result<StepExecution, BatchError> {
        let mut step_execution: StepExecution = restore(value)?;
        self.link(&mut step_execution);
        Ok(step_execution)
    }

    fn link(&self, step_execution: &mut StepExecution) {
        let interrupt = step_execution
            .id
            .and_then(|id| self.step_interrupts.get(&id));
        if let Some(interrupt) = interrupt {
            step_execution.attach(interrupt.clone());
        }
    }
}

/// Map-backed [`JobRepository`].
///
/// Records are stored as JSON snapshots, so callers always get their own copy
/// and never share mutable state with the store. Only the stop signal is shared:
/// the store keeps the cancellation token of every execution it created or added
/// and hands it to the copies it returns.
#[derive(Default)]
pub struct InMemoryJobRepository {
    store: Mutex<Store>,
    job_instance_ids: AtomicU64,
    job_execution_ids: AtomicU64,
    step_execution_ids: AtomicU64,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> Result<MutexGuard<'_, Store>, BatchError> {
        self.store
            .lock()
            .map_err(|_| BatchError::Repository("in-memory store is poisoned".to_owned()))
    }

    fn executions_of(store: &Store, job_instance_id: u64) -> Result<Vec<JobExecution>, BatchError> {
        store
            .job_executions
            .values()
            .map(restore::<JobExecution>)
            .filter(|execution| {
                execution
                    .as_ref()
                    .map_or(true, |e| e.job_instance.id == job_instance_id)
            })
            .collect()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_job_execution(
        &self,
        job_name: &str,
        restartable: bool,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        let mut store = self.store()?;

        let existing = store
            .job_instances
            .values()
            .find(|instance| instance.job_name == job_name && &instance.parameters == parameters)
            .cloned();

        let job_instance = match existing {
            Some(instance) => {
                let executions = Self::executions_of(&store, instance.id)?;

                if executions.iter().any(|e| e.status.is_running()) {
                    return Err(BatchError::JobExecutionAlreadyRunning(job_name.to_owned()));
                }
                if executions.iter().any(|e| e.status == BatchStatus::Completed) {
                    return Err(BatchError::JobInstanceAlreadyComplete(job_name.to_owned()));
                }
                if !restartable && !executions.is_empty() {
                    return Err(BatchError::JobRestart(format!(
                        "job {job_name} is not restartable"
                    )));
                }
                instance
            }
            None => {
                let instance = JobInstance {
                    id: self.job_instance_ids.fetch_add(1, Ordering::SeqCst) + 1,
                    job_name: job_name.to_owned(),
                    parameters: parameters.clone(),
                };
                store.job_instances.insert(instance.id, instance.clone());
                instance
            }
        };

        let id = self.job_execution_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let job_execution = JobExecution::new(id, job_instance);
        store.job_executions.insert(id, snapshot(&job_execution)?);
        store
            .job_interrupts
            .insert(id, job_execution.cancellation_token());

        debug!("Created job execution {} for job {}", id, job_name);
        Ok(job_execution)
    }

    fn update_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        let mut store = self.store()?;

        if !store.job_executions.contains_key(&job_execution.id) {
            return Err(BatchError::Repository(format!(
                "unknown job execution {}",
                job_execution.id
            )));
        }
        store
            .job_executions
            .insert(job_execution.id, snapshot(job_execution)?);
        Ok(())
    }

    fn add_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        let mut store = self.store()?;

        if step_execution.id.is_some() {
            return Err(BatchError::Repository(format!(
                "step execution {} is already stored",
                step_execution.step_name
            )));
        }
        if !store
            .job_executions
            .contains_key(&step_execution.job_execution_id)
        {
            return Err(BatchError::Repository(format!(
                "unknown job execution {}",
                step_execution.job_execution_id
            )));
        }

        let id = self.step_execution_ids.fetch_add(1, Ordering::SeqCst) + 1;
        step_execution.id = Some(id);
        store.step_executions.insert(id, snapshot(step_execution)?);
        store
            .step_interrupts
            .insert(id, step_execution.cancellation_token());
        Ok(())
    }

    fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        let mut store = self.store()?;

        let id = step_execution.id.ok_or_else(|| {
            BatchError::Repository(format!(
                "step execution {} has never been stored",
                step_execution.step_name
            ))
        })?;
        if !store.step_executions.contains_key(&id) {
            return Err(BatchError::Repository(format!(
                "unknown step execution {id}"
            )));
        }
        store.step_executions.insert(id, snapshot(step_execution)?);
        Ok(())
    }

    fn get_job_execution(&self, id: u64) -> Result<Option<JobExecution>, BatchError> {
        let store = self.store()?;
        store
            .job_executions
            .get(&id)
            .map(|value| store.job_execution(value))
            .transpose()
    }

    fn get_step_execution(&self, id: u64) -> Result<Option<StepExecution>, BatchError> {
        let store = self.store()?;
        store
            .step_executions
            .get(&id)
            .map(|value| store.step_execution(value))
            .transpose()
    }

    fn get_last_step_execution(
        &self,
        job_instance_id: u64,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        let store = self.store()?;

        let job_execution_ids: Vec<u64> = Self::executions_of(&store, job_instance_id)?
            .iter()
            .map(|execution| execution.id)
            .collect();

        let mut last: Option<StepExecution> = None;
        for value in store.step_executions.values() {
            let step_execution = store.step_execution(value)?;
            if step_execution.step_name != step_name
                || !job_execution_ids.contains(&step_execution.job_execution_id)
            {
                continue;
            }
            if last.as_ref().is_none_or(|l| l.id < step_execution.id) {
                last = Some(step_execution);
            }
        }
        Ok(last)
    }
}

fn snapshot<T: Serialize>(record: &T) -> Result<Value, BatchError> {
    serde_json::to_value(record).map_err(|error| BatchError::Repository(error.to_string()))
}

fn restore<T: DeserializeOwned>(value: &Value) -> Result<T, BatchError> {
    T::deserialize(value).map_err(|error| BatchError::Repository(error.to_string()))
}
