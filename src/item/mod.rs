/// In-memory reader and transaction-aware writer backed by vectors.
pub mod list;

#[cfg(feature = "logger")]
#[cfg_attr(docsrs, doc(cfg(feature = "logger")))]
/// This module provides a logger item writer, useful for debugging purposes.
pub mod logger;
