use std::fmt::Debug;

use log::info;

use crate::core::item::{ItemWriter, ItemWriterResult};

/// Writer logging every item at `info` level.
#[derive(Default)]
pub struct LoggerWriter {}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, item: &T) -> ItemWriterResult {
        info!("Record:{:?}", item);
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        info!("Chunk committed");
        Ok(())
    }

    fn clear(&self) -> ItemWriterResult {
        info!("Chunk rolled back, records above are discarded");
        Ok(())
    }
}
