use bloom::{AlwaysPresentFilter, Filter};
use log::debug;
use memtable::{DecoratedKey, Partition};
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::descriptor::{Component, Descriptor};
use crate::error::{corrupt, Result, SSTableError};
use crate::format::{read_index_entry, read_partition};
use crate::index::RowIndexEntry;
use crate::stats::StatsMetadata;

/// Read access to one committed table.
///
/// On open the statistics and the filter are loaded, and `Index.db` is
/// scanned once into an in-memory summary of `(key, index_position)` pairs.
/// Entries and partitions are read on demand through persistent file
/// handles, each behind a `Mutex` so lookups work through `&self`.
///
/// The reader owns one reference to the filter and releases it on drop.
pub struct SSTableReader {
    descriptor: Descriptor,
    filter: Box<dyn Filter>,
    stats: StatsMetadata,
    /// Sorted by key, in write order.
    summary: Vec<(DecoratedKey, u64)>,
    index: Mutex<BufReader<File>>,
    data: Mutex<BufReader<File>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every read seeks first, so a handle left mid-read by a panic is still usable.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SSTableReader {
    /// Opens a committed table.
    ///
    /// # Errors
    ///
    /// [`SSTableError::NotCommitted`] if the table has no TOC, or any I/O or
    /// corruption error from loading its components.
    pub fn open(descriptor: Descriptor) -> Result<Self> {
        if !descriptor.is_committed() {
            return Err(SSTableError::NotCommitted(descriptor.to_string()));
        }

        let stats_file = File::open(descriptor.path_for(Component::Statistics))?;
        let stats = StatsMetadata::read_from(&mut BufReader::new(stats_file))?;

        let filter_path = descriptor.path_for(Component::Filter);
        let filter: Box<dyn Filter> = if filter_path.exists() {
            let mut r = BufReader::new(File::open(&filter_path)?);
            bloom::deserialize(&mut r, descriptor.version.filter_format())?
        } else {
            Box::new(AlwaysPresentFilter)
        };

        Self::open_with_filter(descriptor, filter, stats)
    }

    /// Opens a table whose filter and statistics are already in memory, as
    /// right after the writer commits it.
    pub(crate) fn open_with_filter(
        descriptor: Descriptor,
        filter: Box<dyn Filter>,
        stats: StatsMetadata,
    ) -> Result<Self> {
        let mut index = BufReader::new(File::open(descriptor.path_for(Component::PrimaryIndex))?);
        let mut summary = Vec::with_capacity(stats.partition_count as usize);
        loop {
            let position = index.stream_position()?;
            match read_index_entry(&mut index)? {
                Some((key, _)) => {
                    if let Some((previous, _)) = summary.last() {
                        if &key <= previous {
                            return Err(corrupt("Index.db", format!("key {:?} out of order", key)));
                        }
                    }
                    summary.push((key, position));
                }
                None => break,
            }
        }
        if summary.len() as u64 != stats.partition_count {
            return Err(corrupt(
                "Index.db",
                format!(
                    "{} entries but statistics record {} partitions",
                    summary.len(),
                    stats.partition_count
                ),
            ));
        }

        let data = BufReader::new(File::open(descriptor.path_for(Component::Data))?);
        debug!("opened {} ({} partitions)", descriptor, summary.len());

        Ok(Self {
            descriptor,
            filter,
            stats,
            summary,
            index: Mutex::new(index),
            data: Mutex::new(data),
        })
    }

    /// The key whose `Index.db` entry starts at `index_position`.
    ///
    /// `index_position` is the value the writer passed to
    /// `start_partition` for that partition.
    pub fn key_at_position_from_secondary_index(&self, index_position: u64) -> Result<DecoratedKey> {
        let mut f = lock(&self.index);
        f.seek(SeekFrom::Start(index_position))?;
        match read_index_entry(&mut *f)? {
            Some((key, _)) => Ok(key),
            None => Err(corrupt(
                "Index.db",
                format!("no entry at position {}", index_position),
            )),
        }
    }

    fn index_position(&self, key: &DecoratedKey) -> Option<u64> {
        self.summary
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| self.summary[i].1)
    }

    /// The index entry for `key`, or `None` if the table does not hold it.
    pub fn row_index_entry(&self, key: &[u8]) -> Result<Option<RowIndexEntry>> {
        let key = DecoratedKey::new(key);
        if !self.filter.is_present(&key) {
            return Ok(None);
        }
        let position = match self.index_position(&key) {
            Some(p) => p,
            None => return Ok(None),
        };

        let mut f = lock(&self.index);
        f.seek(SeekFrom::Start(position))?;
        match read_index_entry(&mut *f)? {
            Some((found, entry)) if found == key => Ok(Some(entry)),
            _ => Err(corrupt(
                "Index.db",
                format!("summary pointed to a mismatching entry at {}", position),
            )),
        }
    }

    /// Reads back the whole partition stored under `key`.
    pub fn partition(&self, key: &[u8]) -> Result<Option<Partition>> {
        match self.row_index_entry(key)? {
            Some(entry) => self.partition_at(entry.data_position).map(Some),
            None => Ok(None),
        }
    }

    /// Reads the partition starting at `data_position` in `Data.db`.
    pub fn partition_at(&self, data_position: u64) -> Result<Partition> {
        let mut f = lock(&self.data);
        f.seek(SeekFrom::Start(data_position))?;
        read_partition(&mut *f, data_position)
    }

    /// Filter check only: `false` means `key` is definitely absent.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.filter.is_present(&DecoratedKey::new(key))
    }

    #[must_use]
    pub fn filter(&self) -> &dyn Filter {
        self.filter.as_ref()
    }

    /// A new handle on this table's filter. The caller must `close` it.
    #[must_use]
    pub fn shared_filter(&self) -> Box<dyn Filter> {
        self.filter.shared_copy()
    }

    #[must_use]
    pub fn stats(&self) -> &StatsMetadata {
        &self.stats
    }

    #[must_use]
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.summary.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
    }

    /// Keys in table order.
    pub fn keys(&self) -> impl Iterator<Item = &DecoratedKey> {
        self.summary.iter().map(|(k, _)| k)
    }
}

impl Drop for SSTableReader {
    fn drop(&mut self) {
        self.filter.close();
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("descriptor", &self.descriptor)
            .field("partitions", &self.summary.len())
            .field("filter", &self.filter)
            .finish()
    }
}
