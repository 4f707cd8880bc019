use std::{cell::RefCell, collections::VecDeque};

use log::debug;

use crate::core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult};

/// Reader serving the items of a vector, in order, then signalling exhaustion.
pub struct ListItemReader<T> {
    items: RefCell<VecDeque<T>>,
}

impl<T> ListItemReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: RefCell::new(items.into()),
        }
    }

    /// Number of items not read yet.
    pub fn remaining(&self) -> usize {
        self.items.borrow().len()
    }
}

impl<T> ItemReader<T> for ListItemReader<T> {
    fn read(&self) -> ItemReaderResult<T> {
        Ok(self.items.borrow_mut().pop_front())
    }
}

/// Writer collecting items in memory.
///
/// Written items stay pending until the chunk is flushed, and are dropped
/// when the chunk is cleared, so only committed chunks are visible through
/// [`ListItemWriter::get_items`].
pub struct ListItemWriter<T> {
    pending: RefCell<Vec<T>>,
    written: RefCell<Vec<T>>,
}

impl<T: Clone> ListItemWriter<T> {
    pub fn new() -> Self {
        Self {
            pending: RefCell::new(Vec::new()),
            written: RefCell::new(Vec::new()),
        }
    }

    /// Items of every flushed chunk.
    pub fn get_items(&self) -> Vec<T> {
        self.written.borrow().clone()
    }

    /// Items written in the current, not yet flushed, chunk.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl<T: Clone> Default for ListItemWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ItemWriter<T> for ListItemWriter<T> {
    fn write(&self, item: &T) -> ItemWriterResult {
        self.pending.borrow_mut().push(item.clone());
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        let mut pending = self.pending.borrow_mut();
        debug!("Flushing {} items", pending.len());
        self.written.borrow_mut().append(&mut pending);
        Ok(())
    }

    fn clear(&self) -> ItemWriterResult {
        let mut pending = self.pending.borrow_mut();
        debug!("Discarding {} items", pending.len());
        pending.clear();
        Ok(())
    }
}
