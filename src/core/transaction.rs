use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use log::debug;
use uuid::Uuid;

use crate::BatchError;

/// Handle of one open transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: Uuid,
}

impl Transaction {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction boundary around each chunk.
///
/// A rollback must undo every write issued since the matching `begin`.
pub trait TransactionManager: Send + Sync {
    fn begin(&self) -> Result<Transaction, BatchError>;

    fn commit(&self, transaction: Transaction) -> Result<(), BatchError>;

    fn rollback(&self, transaction: Transaction) -> Result<(), BatchError>;
}

impl<T: TransactionManager + ?Sized> TransactionManager for &T {
    fn begin(&self) -> Result<Transaction, BatchError> {
        (**self).begin()
    }

    fn commit(&self, transaction: Transaction) -> Result<(), BatchError> {
        (**self).commit(transaction)
    }

    fn rollback(&self, transaction: Transaction) -> Result<(), BatchError> {
        (**self).rollback(transaction)
    }
}

/// Transaction manager for steps whose writers hold no transactional resource.
///
/// It only enforces that a single transaction is open at a time, and keeps
/// counts of what happened.
#[derive(Default)]
pub struct ResourcelessTransactionManager {
    active: Mutex<Option<Uuid>>,
    begin_count: AtomicUsize,
    commit_count: AtomicUsize,
    rollback_count: AtomicUsize,
}

impl ResourcelessTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_count(&self) -> usize {
        self.begin_count.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commit_count.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.rollback_count.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().map(|active| active.is_some()).unwrap_or(false)
    }

    fn end(&self, transaction: &Transaction) -> Result<(), BatchError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| BatchError::Transaction("transaction state is poisoned".to_owned()))?;

        match *active {
            Some(id) if id == transaction.id() => {
                *active = None;
                Ok(())
            }
            _ => Err(BatchError::Transaction(format!(
                "transaction {} is not active",
                transaction.id()
            ))),
        }
    }
}

impl TransactionManager for ResourcelessTransactionManager {
    fn begin(&self) -> Result<Transaction, BatchError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| BatchError::Transaction("transaction state is poisoned".to_owned()))?;

        if let Some(id) = *active {
            return Err(BatchError::Transaction(format!(
                "transaction {id} is still active"
            )));
        }

        let transaction = Transaction::new();
        *active = Some(transaction.id());
        self.begin_count.fetch_add(1, Ordering::SeqCst);
        debug!("Begin transaction {}", transaction.id());
        Ok(transaction)
    }

    fn commit(&self, transaction: Transaction) -> Result<(), BatchError> {
        self.end(&transaction)?;
        self.commit_count.fetch_add(1, Ordering::SeqCst);
        debug!("Commit transaction {}", transaction.id());
        Ok(())
    }

    fn rollback(&self, transaction: Transaction) -> Result<(), BatchError> {
        self.end(&transaction)?;
        self.rollback_count.fetch_add(1, Ordering::SeqCst);
        debug!("Rollback transaction {}", transaction.id());
        Ok(())
    }
}
