//! Flush observer protocol.
//!
//! The writer drives every registered observer synchronously, in
//! registration order:
//!
//! ```text
//! begin(estimated_keys)
//! for each partition:
//!     start_partition(key, data_position, index_position)
//!     static_row(row)                  at most once
//!     next_unfiltered_cluster(unit)    zero or more
//! complete()                           only after a successful commit
//! ```
//!
//! `complete` is never called for an aborted write, so an observer must not
//! publish anything it built until it sees it.

use bloom::{Filter, FilterKey};
use memtable::{DecoratedKey, Row, Unfiltered};

pub trait FlushObserver {
    /// Called once before the first partition.
    fn begin(&mut self, _estimated_keys: u64) {}

    /// Opens a new partition context. `data_position` is where the partition
    /// starts in `Data.db`, `index_position` where its entry starts in
    /// `Index.db`.
    fn start_partition(&mut self, key: &DecoratedKey, data_position: u64, index_position: u64);

    fn static_row(&mut self, _row: &Row) {}

    fn next_unfiltered_cluster(&mut self, unfiltered: &Unfiltered);

    /// Called once after every component is durable.
    fn complete(&mut self);
}

/// Observer that builds a membership filter over the flushed partition keys.
///
/// The filter is only handed out after `complete`.
#[derive(Debug)]
pub struct FilterBuilder {
    filter: Box<dyn Filter>,
    complete: bool,
}

impl FilterBuilder {
    pub fn new(filter: Box<dyn Filter>) -> Self {
        Self {
            filter,
            complete: false,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The built filter, or `None` if the write never completed.
    pub fn into_filter(self) -> Option<Box<dyn Filter>> {
        if self.complete {
            Some(self.filter)
        } else {
            let mut filter = self.filter;
            filter.close();
            None
        }
    }
}

impl FlushObserver for FilterBuilder {
    fn start_partition(&mut self, key: &DecoratedKey, _data_position: u64, _index_position: u64) {
        self.filter.add(key as &dyn FilterKey);
    }

    fn next_unfiltered_cluster(&mut self, _unfiltered: &Unfiltered) {}

    fn complete(&mut self) {
        self.complete = true;
    }
}
