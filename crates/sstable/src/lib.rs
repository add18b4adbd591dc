//! # SSTable - Sorted String Table write path
//!
//! Turns a sorted stream of [`memtable::Partition`]s into an immutable
//! on-disk table, reporting the exact byte position of every partition to a
//! set of [`FlushObserver`]s as it goes.
//!
//! ## Components
//!
//! ```text
//! ┌──────────────────────┬─────────────────────────────────────────────────┐
//! │ <v>-<gen>-big-Data.db       │ partitions: header, CRC32-framed units   │
//! │ <v>-<gen>-big-Index.db      │ one entry per partition: key, data       │
//! │                             │ position, promoted column index          │
//! │ <v>-<gen>-big-Filter.db     │ serialized bloom filter (if informative) │
//! │ <v>-<gen>-big-Statistics.db │ counts, timestamps, first/last key       │
//! │ <v>-<gen>-big-TOC.txt       │ component list; written last = committed │
//! └──────────────────────┴─────────────────────────────────────────────────┘
//! ```
//!
//! ## Write protocol
//!
//! ```text
//! for each partition:
//!     data_position  = Data.db offset      index_position = Index.db offset
//!     observers.start_partition(key, data_position, index_position)
//!     [static row]   → Data.db, observers.static_row(row)
//!     [rows/markers] → Data.db, observers.next_unfiltered_cluster(unit)
//!     index entry    → Index.db, key → filter
//! finish: Filter.db, Statistics.db, sync, rename, TOC.txt, observers.complete()
//! ```
//!
//! A failure anywhere aborts the write: temporary components are deleted
//! and no observer is told the write completed.
//!
//! Format version `ma` stores the filter in the legacy encoding, `nb` in the
//! current one. See [`format`] for the byte layouts.

mod descriptor;
mod error;
mod flush;
pub mod format;
mod index;
mod observer;
mod position;
mod reader;
mod stats;
mod writer;

pub use descriptor::{Component, Descriptor, Version};
pub use error::{Result, SSTableError};
pub use flush::flush_memtable;
pub use index::{ColumnIndexBuilder, IndexInfo, RowIndexEntry};
pub use observer::{FilterBuilder, FlushObserver};
pub use position::{ComponentSink, FileSinkFactory, PositionTracker, SinkFactory};
pub use reader::SSTableReader;
pub use stats::{StatsCollector, StatsMetadata, STATS_MAGIC};
pub use writer::{PartitionPosition, SSTableWriter, SSTableWriterBuilder};

#[cfg(test)]
mod tests;
