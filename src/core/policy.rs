//! Completion policies decide when a repeat loop should stop on its own.
//!
//! A policy is a pure function of the [`RepeatContext`]: it is asked before every
//! iteration and never mutates anything. Policies that take a threshold reject
//! invalid values at construction time with [`BatchError::Configuration`].

use std::time::Duration;

use crate::BatchError;

use super::repeat::{RepeatContext, RepeatStatus};

/// Decides whether a repeat loop is complete.
pub trait CompletionPolicy: Send + Sync {
    fn is_complete(&self, context: &RepeatContext) -> bool;
}

/// Never completes on its own: the loop runs until the callback reports
/// [`RepeatStatus::Finished`] or the loop is interrupted.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResultCompletionPolicy;

impl CompletionPolicy for DefaultResultCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        context.last_status() == Some(RepeatStatus::Finished)
    }
}

/// Completes once a fixed number of iterations has been performed.
///
/// Used at chunk level, the threshold is the commit interval.
#[derive(Debug, Clone, Copy)]
pub struct SimpleCompletionPolicy {
    chunk_size: usize,
}

impl SimpleCompletionPolicy {
    pub fn new(chunk_size: usize) -> Result<Self, BatchError> {
        if chunk_size == 0 {
            return Err(BatchError::Configuration(
                "completion policy threshold must be positive".to_owned(),
            ));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl CompletionPolicy for SimpleCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        context.count() >= self.chunk_size
            || context.last_status() == Some(RepeatStatus::Finished)
    }
}

/// Completes once the loop has been running for longer than a timeout.
///
/// The check happens at loop boundaries only, so a long callback overruns the
/// timeout by at most one invocation.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutCompletionPolicy {
    timeout: Duration,
}

impl TimeoutCompletionPolicy {
    pub fn new(timeout: Duration) -> Result<Self, BatchError> {
        if timeout.is_zero() {
            return Err(BatchError::Configuration(
                "completion policy timeout must be positive".to_owned(),
            ));
        }
        Ok(Self { timeout })
    }
}

impl CompletionPolicy for TimeoutCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        context.elapsed() >= self.timeout
            || context.last_status() == Some(RepeatStatus::Finished)
    }
}

/// Completes as soon as any of its member policies completes.
pub struct CompositeCompletionPolicy {
    policies: Vec<Box<dyn CompletionPolicy>>,
}

impl CompositeCompletionPolicy {
    pub fn new(policies: Vec<Box<dyn CompletionPolicy>>) -> Result<Self, BatchError> {
        if policies.is_empty() {
            return Err(BatchError::Configuration(
                "composite completion policy needs at least one policy".to_owned(),
            ));
        }
        Ok(Self { policies })
    }
}

impl CompletionPolicy for CompositeCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        self.policies
            .iter()
            .any(|policy| policy.is_complete(context))
    }
}
