#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Chunk Batch

 A chunk-oriented batch step execution engine. A step reads items one at a
 time, writes each item read, and groups the work into fixed-size chunks
 that are committed as a single transaction. A running step can be stopped
 from another thread; it stops at the next item boundary, rolls back the
 chunk in flight and ends `STOPPED`.

 ## Core Concepts

- **RepeatOperations:** drives a callback until a `CompletionPolicy`, the callback
  itself, or a cancellation ends the loop. A step nests two of them: one per chunk,
  one per item.
- **CompletionPolicy:** decides when a loop is complete. `SimpleCompletionPolicy`
  counts iterations (the commit interval), `DefaultResultCompletionPolicy` never
  completes on its own.
- **ItemReader / ItemWriter:** supply and consume the items. Writers buffer the
  writes of the current chunk until it is flushed, and discard them when it is cleared.
- **JobExecution / StepExecution:** records of a run, with a status following
  `STARTING -> STARTED -> COMPLETED | STOPPING -> STOPPED | FAILED`.
- **JobRepository:** stores the execution records. `InMemoryJobRepository` keeps them
  in memory.
- **TransactionManager:** begins, commits and rolls back the chunk transactions.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes  |
| full          | Enables all available features                                |

 ## Getting Started

```rust
use chunk_batch::{
    core::{
        execution::{BatchStatus, JobParameters},
        job::{Job, JobBuilder},
        repository::InMemoryJobRepository,
        step::StepBuilder,
    },
    error::BatchError,
    item::list::{ListItemReader, ListItemWriter},
};

fn main() -> Result<(), BatchError> {
    let repository = InMemoryJobRepository::new();

    let reader = ListItemReader::new(vec!["Porsche", "Peugeot", "Mazda", "Ford"]);
    let writer = ListItemWriter::new();

    let step = StepBuilder::new("copy-cars")
        .items(&reader, &writer) // read from the list, write to the writer
        .repository(&repository)
        .chunk(2) // set commit interval
        .build()?;

    let job = JobBuilder::new(&repository).name("cars").start(&step).build();
    let execution = job.run(&JobParameters::new())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    // two full chunks, then an empty one observing the end of the input
    assert_eq!(execution.step_executions()[0].commit_count, 3);
    assert_eq!(writer.get_items().len(), 4);

    Ok(())
}
```

 ## Stopping a step

 Every `StepExecution` carries a cancellation token. Cloning it with
 `StepExecution::cancellation_token` and cancelling it from another thread makes
 the step stop at its next loop boundary and return `BatchError::Interrupted`.
 Stopping a `JobExecution` stops all of its steps.

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of bundled item readers and writers
pub mod item;
