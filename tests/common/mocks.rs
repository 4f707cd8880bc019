//! Mock versions of the engine's collaborators.
use mockall::mock;

use chunk_batch::{
    BatchError,
    core::{
        execution::{JobExecution, JobParameters, StepExecution},
        repository::JobRepository,
        transaction::{Transaction, TransactionManager},
    },
};

mock! {
    pub TransactionManager {}
    impl TransactionManager for TransactionManager {
        fn begin(&self) -> Result<Transaction, BatchError>;
        fn commit(&self, transaction: Transaction) -> Result<(), BatchError>;
        fn rollback(&self, transaction: Transaction) -> Result<(), BatchError>;
    }
}

mock! {
    pub JobRepository {}
    impl JobRepository for JobRepository {
        fn create_job_execution(
            &self,
            job_name: &str,
            restartable: bool,
            parameters: &JobParameters,
        ) -> Result<JobExecution, BatchError>;
        fn update_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError>;
        fn add_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
        fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError>;
        fn get_job_execution(&self, id: u64) -> Result<Option<JobExecution>, BatchError>;
        fn get_step_execution(&self, id: u64) -> Result<Option<StepExecution>, BatchError>;
        fn get_last_step_execution(
            &self,
            job_instance_id: u64,
            step_name: &str,
        ) -> Result<Option<StepExecution>, BatchError>;
    }
}
