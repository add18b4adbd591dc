use bloom::Filter;
use config::SSTableConfig;
use log::{debug, info, trace, warn};
use memtable::{DecoratedKey, Partition};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use crate::descriptor::{Component, Descriptor};
use crate::error::{Result, SSTableError};
use crate::format::{
    encode_row, encode_unfiltered, write_end_of_partition, write_index_entry,
    write_partition_header, write_unit, KIND_STATIC_ROW, MAX_KEY_BYTES,
};
use crate::index::{ColumnIndexBuilder, RowIndexEntry};
use crate::observer::FlushObserver;
use crate::position::{ComponentSink, FileSinkFactory, PositionTracker, SinkFactory};
use crate::reader::SSTableReader;
use crate::stats::{StatsCollector, StatsMetadata};

/// Where one appended partition landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPosition {
    /// Offset of the partition header in `Data.db`.
    pub data_position: u64,
    /// Offset of the partition's entry in `Index.db`.
    pub index_position: u64,
}

/// Configures and opens an [`SSTableWriter`].
pub struct SSTableWriterBuilder<'a> {
    descriptor: Descriptor,
    key_count: u64,
    config: SSTableConfig,
    observers: Vec<&'a mut dyn FlushObserver>,
    sinks: Box<dyn SinkFactory>,
}

impl<'a> SSTableWriterBuilder<'a> {
    /// Expected number of partitions. Sizes the filter and is passed to
    /// every observer's `begin`. With zero the table gets no filter.
    pub fn key_count(mut self, key_count: u64) -> Self {
        self.key_count = key_count;
        self
    }

    pub fn config(mut self, config: SSTableConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers an observer. Observers are notified in registration order.
    pub fn observer(mut self, observer: &'a mut dyn FlushObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn observers(mut self, observers: impl IntoIterator<Item = &'a mut dyn FlushObserver>) -> Self {
        self.observers.extend(observers);
        self
    }

    pub fn sink_factory(mut self, sinks: impl SinkFactory + 'static) -> Self {
        self.sinks = Box::new(sinks);
        self
    }

    /// Creates the temporary `Data.db` and `Index.db`, allocates the filter
    /// and calls `begin` on every observer.
    ///
    /// # Errors
    ///
    /// Fails on an invalid config, on I/O failure, or if a committed table
    /// already exists for the descriptor.
    pub fn build(self) -> Result<SSTableWriter<'a>> {
        self.config.validate()?;
        fs::create_dir_all(&self.descriptor.directory)?;
        if self.descriptor.is_committed() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("table {} already exists", self.descriptor),
            )
            .into());
        }

        let filter = bloom::get_filter(self.key_count, self.config.bloom_fp_chance)?;
        let stats = StatsCollector::new(self.config.bloom_fp_chance);

        let mut writer = SSTableWriter {
            descriptor: self.descriptor,
            config: self.config,
            observers: self.observers,
            sinks: self.sinks,
            created: Vec::new(),
            state: State::Aborted,
        };

        let opened = writer
            .create(Component::Data)
            .and_then(|data| Ok((data, writer.create(Component::PrimaryIndex)?)));
        let (data, index) = match opened {
            Ok(sinks) => sinks,
            Err(e) => {
                writer.remove_components();
                return Err(e);
            }
        };

        writer.state = State::Writing(Box::new(Outputs {
            data: PositionTracker::new(data),
            index: PositionTracker::new(index),
            filter,
            stats,
            last_key: None,
            buf: Vec::with_capacity(256),
        }));

        for observer in writer.observers.iter_mut() {
            observer.begin(self.key_count);
        }
        debug!(
            "opened writer for {} (expected keys {}, {} observers)",
            writer.descriptor,
            self.key_count,
            writer.observers.len()
        );
        Ok(writer)
    }
}

struct Outputs {
    data: PositionTracker,
    index: PositionTracker,
    filter: Box<dyn Filter>,
    stats: StatsCollector,
    last_key: Option<DecoratedKey>,
    /// Reusable buffer for encoding unit bodies before they are CRC'd.
    buf: Vec<u8>,
}

enum State {
    Writing(Box<Outputs>),
    Aborted,
    Committed,
}

/// Streams sorted partitions into a new table.
///
/// # Lifecycle
///
/// ```text
/// builder(..).build()  ──▶  append(p1) .. append(pN)  ──▶  finish()  ──▶ committed
///                                   │
///                                   └── error / abort() / drop ──▶ tmp files removed
/// ```
///
/// Every component is written under a `tmp-` name. `finish` syncs them,
/// renames them into place and writes `TOC.txt` last; only then are the
/// observers' `complete` callbacks run and a reader handed out. Any error
/// from `append` or `finish` aborts the write: temporary files are removed
/// and no observer sees `complete`.
///
/// Driven by a single thread. Observers run inline.
pub struct SSTableWriter<'a> {
    descriptor: Descriptor,
    config: SSTableConfig,
    observers: Vec<&'a mut dyn FlushObserver>,
    sinks: Box<dyn SinkFactory>,
    /// Components whose files have been created so far.
    created: Vec<Component>,
    state: State,
}

impl<'a> SSTableWriter<'a> {
    pub fn builder(descriptor: Descriptor) -> SSTableWriterBuilder<'a> {
        SSTableWriterBuilder {
            descriptor,
            key_count: 0,
            config: SSTableConfig::default(),
            observers: Vec::new(),
            sinks: Box::new(FileSinkFactory),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Number of partitions written so far.
    #[must_use]
    pub fn partition_count(&self) -> u64 {
        match &self.state {
            State::Writing(out) => out.stats.partition_count(),
            _ => 0,
        }
    }

    /// Offsets the next partition will be written at.
    #[must_use]
    pub fn position(&self) -> Option<PartitionPosition> {
        match &self.state {
            State::Writing(out) => Some(PartitionPosition {
                data_position: out.data.position(),
                index_position: out.index.position(),
            }),
            _ => None,
        }
    }

    /// Writes one partition and notifies the observers.
    ///
    /// Returns `None` for a partition with nothing to write, which is
    /// skipped without any observer call.
    ///
    /// # Errors
    ///
    /// [`SSTableError::OutOfOrder`] if `partition` does not sort strictly
    /// after the previous one, [`SSTableError::Aborted`] if the writer
    /// already failed, or any I/O error. Every error aborts the writer.
    pub fn append(&mut self, partition: &Partition) -> Result<Option<PartitionPosition>> {
        let out = match &mut self.state {
            State::Writing(out) => out,
            _ => return Err(SSTableError::Aborted(self.descriptor.to_string())),
        };
        let block_size = self.config.column_index_size as u64;
        match write_partition(out, &mut self.observers, block_size, partition) {
            Ok(position) => Ok(position),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Commits the table and runs every observer's `complete`.
    ///
    /// With `open_result` the committed table is returned as a reader that
    /// takes over the in-memory filter.
    ///
    /// # Errors
    ///
    /// [`SSTableError::Empty`] if no partition was written, any I/O error,
    /// or a failure to open the committed table. On error every component
    /// is removed and no observer sees `complete`.
    pub fn finish(self, open_result: bool) -> Result<Option<SSTableReader>> {
        self.commit_and_notify(|descriptor, mut filter, stats| {
            if open_result {
                SSTableReader::open_with_filter(descriptor, filter, stats).map(Some)
            } else {
                filter.close();
                Ok(None)
            }
        })
    }

    /// [`finish`](Self::finish) that always opens the committed table.
    pub fn finish_and_open(self) -> Result<SSTableReader> {
        self.commit_and_notify(SSTableReader::open_with_filter)
    }

    /// Commits, hands the filter to `open`, and only once both succeed runs
    /// every observer's `complete`.
    fn commit_and_notify<T>(
        mut self,
        open: impl FnOnce(Descriptor, Box<dyn Filter>, StatsMetadata) -> Result<T>,
    ) -> Result<T> {
        let out = match std::mem::replace(&mut self.state, State::Aborted) {
            State::Writing(out) => out,
            _ => return Err(SSTableError::Aborted(self.descriptor.to_string())),
        };

        let opened = self.commit(*out).and_then(|(filter, stats)| {
            let counts = (stats.partition_count, stats.row_count);
            open(self.descriptor.clone(), filter, stats).map(|opened| (opened, counts))
        });
        let (opened, (partitions, rows)) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!("failed to commit {}: {}", self.descriptor, e);
                self.remove_components();
                return Err(e);
            }
        };
        self.state = State::Committed;

        for observer in self.observers.iter_mut() {
            observer.complete();
        }
        info!(
            "committed {} ({} partitions, {} rows)",
            self.descriptor, partitions, rows
        );
        Ok(opened)
    }

    /// Abandons the write and removes every component written so far.
    pub fn abort(mut self) {
        self.fail(&"aborted by caller");
    }

    fn create(&mut self, component: Component) -> Result<Box<dyn ComponentSink>> {
        let sink = self.sinks.create(&self.descriptor.tmp_path_for(component))?;
        self.created.push(component);
        Ok(sink)
    }

    fn commit(&mut self, out: Outputs) -> Result<(Box<dyn Filter>, StatsMetadata)> {
        let Outputs {
            data,
            index,
            filter,
            stats,
            ..
        } = out;
        if stats.partition_count() == 0 {
            return Err(SSTableError::Empty);
        }
        let sync = self.config.sync_on_finish;

        close_sink(data.into_inner(), sync)?;
        close_sink(index.into_inner(), sync)?;

        if filter.is_informative() {
            let mut sink = self.create(Component::Filter)?;
            filter.serialize(&mut sink, self.descriptor.version.filter_format())?;
            close_sink(sink, sync)?;
        }

        let stats = stats.finish();
        let mut sink = self.create(Component::Statistics)?;
        stats.write_to(&mut sink)?;
        close_sink(sink, sync)?;

        for component in &self.created {
            fs::rename(
                self.descriptor.tmp_path_for(*component),
                self.descriptor.path_for(*component),
            )?;
        }

        let toc: String = self
            .created
            .iter()
            .chain(std::iter::once(&Component::Toc))
            .map(|c| format!("{}\n", c.name()))
            .collect();
        let mut sink = self.create(Component::Toc)?;
        sink.write_all(toc.as_bytes())?;
        close_sink(sink, sync)?;
        fs::rename(
            self.descriptor.tmp_path_for(Component::Toc),
            self.descriptor.path_for(Component::Toc),
        )?;

        sync_dir(&self.descriptor.directory);
        Ok((filter, stats))
    }

    /// Drops the outputs and removes every file this writer created. No-op
    /// unless the writer is still writing.
    fn fail(&mut self, reason: &dyn fmt::Display) {
        if let State::Writing(out) = std::mem::replace(&mut self.state, State::Aborted) {
            warn!(
                "aborting {} after {} partitions: {}",
                self.descriptor,
                out.stats.partition_count(),
                reason
            );
            drop(out);
            self.remove_components();
        }
    }

    fn remove_components(&mut self) {
        for component in self.created.drain(..) {
            for path in [
                self.descriptor.tmp_path_for(component),
                self.descriptor.path_for(component),
            ] {
                match fs::remove_file(&path) {
                    Ok(()) => trace!("removed {}", path.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!("failed to remove {}: {}", path.display(), e),
                }
            }
        }
    }
}

impl Drop for SSTableWriter<'_> {
    fn drop(&mut self) {
        if matches!(self.state, State::Writing(_)) {
            self.fail(&"writer dropped before finish");
        }
    }
}

fn write_partition(
    out: &mut Outputs,
    observers: &mut [&mut dyn FlushObserver],
    block_size: u64,
    partition: &Partition,
) -> Result<Option<PartitionPosition>> {
    let key = &partition.key;
    if let Some(previous) = &out.last_key {
        if key <= previous {
            return Err(SSTableError::OutOfOrder {
                previous: previous.clone(),
                current: key.clone(),
            });
        }
    }
    if key.key().len() > MAX_KEY_BYTES {
        return Err(SSTableError::KeyTooLarge(key.key().len()));
    }
    if partition.is_empty() {
        trace!("skipping empty partition {:?}", key);
        out.last_key = Some(key.clone());
        return Ok(None);
    }

    let data_position = out.data.position();
    let index_position = out.index.position();
    for observer in observers.iter_mut() {
        observer.start_partition(key, data_position, index_position);
    }

    let static_row = partition.static_row.as_ref().filter(|row| !row.is_empty());
    write_partition_header(&mut out.data, key, &partition.deletion, static_row.is_some())?;

    if let Some(row) = static_row {
        encode_row(&mut out.buf, row)?;
        write_unit(&mut out.data, KIND_STATIC_ROW, &out.buf)?;
        for observer in observers.iter_mut() {
            observer.static_row(row);
        }
    }

    let mut columns = ColumnIndexBuilder::new(data_position, block_size);
    for unit in &partition.unfiltereds {
        let start = out.data.position();
        let kind = encode_unfiltered(&mut out.buf, unit)?;
        write_unit(&mut out.data, kind, &out.buf)?;
        columns.add(unit.clustering(), start, out.data.position());
        for observer in observers.iter_mut() {
            observer.next_unfiltered_cluster(unit);
        }
    }
    let columns_index = columns.build(out.data.position());
    write_end_of_partition(&mut out.data)?;

    write_index_entry(
        &mut out.index,
        key,
        &RowIndexEntry {
            data_position,
            columns_index,
        },
    )?;

    out.filter.add(key);
    out.stats.update(key, partition);
    out.last_key = Some(key.clone());

    trace!(
        "wrote {:?} at data {} index {}",
        key,
        data_position,
        index_position
    );
    Ok(Some(PartitionPosition {
        data_position,
        index_position,
    }))
}

fn close_sink(mut sink: Box<dyn ComponentSink>, sync: bool) -> io::Result<()> {
    if sync {
        sink.sync()
    } else {
        sink.flush()
    }
}

/// Best-effort fsync of `dir` so the renames survive a crash.
fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}
