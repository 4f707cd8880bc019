#![allow(dead_code)]

mod mocks;

#[allow(unused_imports)]
pub use mocks::{MockJobRepository, MockTransactionManager};

use std::{
    cell::{Cell, RefCell},
    hint::black_box,
};

use chunk_batch::{
    BatchError,
    core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
    item::list::ListItemWriter,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Reader doing some CPU work for every item and never running out of items.
#[derive(Default)]
pub struct EndlessReader {
    count: Cell<usize>,
}

impl EndlessReader {
    pub fn count(&self) -> usize {
        self.count.get()
    }
}

impl ItemReader<f64> for EndlessReader {
    fn read(&self) -> ItemReaderResult<f64> {
        // something non-trivial, and not a sleep
        let mut product: f64 = 1.0;
        for i in 2..250 {
            product = black_box(product * f64::from(i));
        }
        self.count.set(self.count.get() + 1);

        if product != 1.0 {
            Ok(Some(product))
        } else {
            Ok(None)
        }
    }
}

/// Transaction-aware writer failing when asked to write `fail_on`.
pub struct FailingWriter<T> {
    inner: ListItemWriter<T>,
    fail_on: T,
}

impl<T: Clone + PartialEq> FailingWriter<T> {
    pub fn new(fail_on: T) -> Self {
        Self {
            inner: ListItemWriter::new(),
            fail_on,
        }
    }

    pub fn get_items(&self) -> Vec<T> {
        self.inner.get_items()
    }
}

impl<T: Clone + PartialEq> ItemWriter<T> for FailingWriter<T> {
    fn write(&self, item: &T) -> ItemWriterResult {
        if *item == self.fail_on {
            return Err(BatchError::ItemWriter("Permission denied".to_owned()));
        }
        self.inner.write(item)
    }

    fn flush(&self) -> ItemWriterResult {
        self.inner.flush()
    }

    fn clear(&self) -> ItemWriterResult {
        self.inner.clear()
    }
}

/// Writer remembering the size of every flushed and every cleared chunk.
#[derive(Default)]
pub struct ChunkRecordingWriter {
    pending: Cell<usize>,
    flushed: RefCell<Vec<usize>>,
    cleared: RefCell<Vec<usize>>,
}

impl ChunkRecordingWriter {
    pub fn flushed_chunks(&self) -> Vec<usize> {
        self.flushed.borrow().clone()
    }

    pub fn cleared_chunks(&self) -> Vec<usize> {
        self.cleared.borrow().clone()
    }
}

impl<T> ItemWriter<T> for ChunkRecordingWriter {
    fn write(&self, _item: &T) -> ItemWriterResult {
        self.pending.set(self.pending.get() + 1);
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        self.flushed.borrow_mut().push(self.pending.replace(0));
        Ok(())
    }

    fn clear(&self) -> ItemWriterResult {
        self.cleared.borrow_mut().push(self.pending.replace(0));
        Ok(())
    }
}
