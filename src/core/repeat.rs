use std::time::{Duration, Instant};

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::BatchError;

use super::policy::{CompletionPolicy, DefaultResultCompletionPolicy};

/// Outcome of one callback invocation, and of a whole repeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// More work may exist.
    Continuable,
    /// No more work: the loop ends regardless of the completion policy.
    Finished,
}

impl RepeatStatus {
    pub fn is_continuable(&self) -> bool {
        *self == RepeatStatus::Continuable
    }
}

/// Iteration state of a single repeat loop.
///
/// A context lives for exactly one call to [`RepeatOperations::execute`] and is
/// discarded when the loop exits.
#[derive(Debug)]
pub struct RepeatContext {
    count: usize,
    last_status: Option<RepeatStatus>,
    started: Instant,
}

impl RepeatContext {
    pub fn new() -> Self {
        Self {
            count: 0,
            last_status: None,
            started: Instant::now(),
        }
    }

    /// Number of callback invocations performed so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Status returned by the last successful callback invocation.
    pub fn last_status(&self) -> Option<RepeatStatus> {
        self.last_status
    }

    /// Time elapsed since the loop started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn update(&mut self, status: Option<RepeatStatus>) {
        self.count += 1;
        self.last_status = status;
    }
}

impl Default for RepeatContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback driven by a repeat loop.
pub type RepeatCallback<'c> = dyn FnMut(&RepeatContext) -> Result<RepeatStatus, BatchError> + 'c;

/// Drives a callback repeatedly until a completion policy, the callback
/// itself, or a cancellation ends the loop.
pub trait RepeatOperations {
    /// Runs the loop.
    ///
    /// # Returns
    /// - `Ok(RepeatStatus::Finished)` when the callback reported that no work is left
    /// - `Ok(RepeatStatus::Continuable)` when the completion policy ended the loop
    /// - `Err(BatchError::Interrupted)` when `interrupt` was cancelled at a loop boundary
    /// - `Err(_)` with the callback's own error, unmodified
    fn execute(
        &self,
        interrupt: &CancellationToken,
        callback: &mut RepeatCallback<'_>,
    ) -> Result<RepeatStatus, BatchError>;
}

/// Default [`RepeatOperations`] implementation, parameterised by a completion policy.
///
/// # Example
///
/// ```rust
/// use chunk_batch::core::policy::SimpleCompletionPolicy;
/// use chunk_batch::core::repeat::{RepeatOperations, RepeatStatus, RepeatTemplate};
/// use tokio_util::sync::CancellationToken;
///
/// # fn main() -> Result<(), chunk_batch::BatchError> {
/// let template = RepeatTemplate::with_completion_policy(SimpleCompletionPolicy::new(3)?);
/// let mut calls = 0;
/// let status = template.execute(&CancellationToken::new(), &mut |_| {
///     calls += 1;
///     Ok(RepeatStatus::Continuable)
/// })?;
///
/// assert_eq!(calls, 3);
/// assert_eq!(status, RepeatStatus::Continuable);
/// # Ok(())
/// # }
/// ```
pub struct RepeatTemplate {
    completion_policy: Box<dyn CompletionPolicy>,
}

impl RepeatTemplate {
    /// Creates a template that only stops when the callback finishes or the loop is interrupted.
    pub fn new() -> Self {
        Self {
            completion_policy: Box::new(DefaultResultCompletionPolicy),
        }
    }

    pub fn with_completion_policy(policy: impl CompletionPolicy + 'static) -> Self {
        Self {
            completion_policy: Box::new(policy),
        }
    }
}

impl Default for RepeatTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl RepeatOperations for RepeatTemplate {
    fn execute(
        &self,
        interrupt: &CancellationToken,
        callback: &mut RepeatCallback<'_>,
    ) -> Result<RepeatStatus, BatchError> {
        let mut context = RepeatContext::new();

        loop {
            if self.completion_policy.is_complete(&context) {
                debug!("Repeat loop complete after {} iterations", context.count());
                return Ok(RepeatStatus::Continuable);
            }

            if interrupt.is_cancelled() {
                debug!("Interruption observed after {} iterations", context.count());
                return Err(BatchError::Interrupted(format!(
                    "repeat loop cancelled after {} iterations",
                    context.count()
                )));
            }

            let result = callback(&context);
            context.update(result.as_ref().ok().copied());

            if result? == RepeatStatus::Finished {
                debug!("Repeat loop finished after {} iterations", context.count());
                return Ok(RepeatStatus::Finished);
            }
        }
    }
}
