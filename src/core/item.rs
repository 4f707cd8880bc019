use crate::error::BatchError;

/// Represents the result of reading an item from the reader.
///
/// `Ok(None)` marks the end of the input; it is not an error.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Represents the result of writing an item with the writer.
pub type ItemWriterResult = Result<(), BatchError>;

/// Supplies the items of a step, one at a time.
pub trait ItemReader<I> {
    /// Reads the next item.
    ///
    /// # Errors
    /// [`BatchError::ItemReader`] when the underlying source fails.
    fn read(&self) -> ItemReaderResult<I>;
}

/// Consumes the items of a step, one at a time.
///
/// Writes issued after the last [`flush`](ItemWriter::flush) belong to the
/// currently open chunk: `flush` is called just before that chunk commits and
/// [`clear`](ItemWriter::clear) when it rolls back.
pub trait ItemWriter<O> {
    /// Writes one item.
    ///
    /// # Errors
    /// [`BatchError::ItemWriter`] when the underlying destination fails.
    fn write(&self, item: &O) -> ItemWriterResult;

    /// Makes the writes of the current chunk durable.
    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Discards the writes of the current chunk.
    fn clear(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Outcome of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkUnitResult {
    /// One item was read and written.
    ItemProcessed,
    /// The reader is exhausted; nothing was written.
    NoMoreItems,
}

/// The unit of work repeated by a chunk-oriented step.
pub trait ItemProcessor {
    fn process(&self) -> Result<WorkUnitResult, BatchError>;

    /// Called before the chunk transaction commits.
    fn flush(&self) -> Result<(), BatchError> {
        Ok(())
    }

    /// Called after the chunk transaction rolled back.
    fn clear(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn open(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Pairs a reader with a writer: reads one item and, if there was one, writes it.
pub struct SimpleItemProcessor<'a, T> {
    reader: &'a dyn ItemReader<T>,
    writer: &'a dyn ItemWriter<T>,
}

impl<'a, T> SimpleItemProcessor<'a, T> {
    pub fn new<R, W>(reader: &'a R, writer: &'a W) -> Self
    where
        R: ItemReader<T> + 'a,
        W: ItemWriter<T> + 'a,
    {
        Self { reader, writer }
    }
}

impl<T> ItemProcessor for SimpleItemProcessor<'_, T> {
    fn process(&self) -> Result<WorkUnitResult, BatchError> {
        match self.reader.read()? {
            Some(item) => {
                self.writer.write(&item)?;
                Ok(WorkUnitResult::ItemProcessed)
            }
            None => Ok(WorkUnitResult::NoMoreItems),
        }
    }

    fn flush(&self) -> Result<(), BatchError> {
        self.writer.flush()
    }

    fn clear(&self) -> Result<(), BatchError> {
        self.writer.clear()
    }

    fn open(&self) -> Result<(), BatchError> {
        self.writer.open()
    }

    fn close(&self) -> Result<(), BatchError> {
        self.writer.close()
    }
}
