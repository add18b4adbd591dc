
use crate::*;
use memtable::{Cell, Clustering, DecoratedKey, Partition, Row, Unfiltered};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// -------------------- Observers --------------------

/// `(raw key, data_position, index_position)`
pub(super) type PartitionSlot = (Vec<u8>, u64, u64);

/// Collects every callback the writer makes.
#[derive(Default)]
pub(super) struct RecordingObserver {
    pub began: Option<u64>,
    pub starts: Vec<PartitionSlot>,
    pub static_rows: usize,
    pub units: usize,
    /// Cells seen per partition, in callback order.
    pub cells: HashMap<PartitionSlot, Vec<Cell>>,
    pub complete_calls: usize,
    current: Option<PartitionSlot>,
}

impl RecordingObserver {
    pub fn is_complete(&self) -> bool {
        self.complete_calls == 1
    }

    fn record(&mut self, cells: &[Cell]) {
        let slot = self
            .current
            .clone()
            .expect("row callback before start_partition");
        self.cells.entry(slot).or_default().extend_from_slice(cells);
    }
}

impl FlushObserver for RecordingObserver {
    fn begin(&mut self, estimated_keys: u64) {
        assert!(self.began.is_none(), "begin called twice");
        self.began = Some(estimated_keys);
    }

    fn start_partition(&mut self, key: &DecoratedKey, data_position: u64, index_position: u64) {
        assert!(self.began.is_some(), "start_partition before begin");
        let slot = (key.key().to_vec(), data_position, index_position);
        self.starts.push(slot.clone());
        self.cells.entry(slot.clone()).or_default();
        self.current = Some(slot);
    }

    fn static_row(&mut self, row: &Row) {
        self.static_rows += 1;
        self.record(row.cells());
    }

    fn next_unfiltered_cluster(&mut self, unfiltered: &Unfiltered) {
        self.units += 1;
        if let Unfiltered::Row(row) = unfiltered {
            self.record(row.cells());
        }
    }

    fn complete(&mut self) {
        self.complete_calls += 1;
    }
}

// -------------------- Failure injection --------------------

/// A file sink that starts failing every write once `armed` is set.
pub(super) struct FailingSink {
    inner: BufWriter<File>,
    armed: Arc<AtomicBool>,
}

fn injected() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "injected write failure")
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.armed.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.armed.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.flush()
    }
}

impl ComponentSink for FailingSink {
    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.inner.get_ref().sync_all()
    }
}

#[derive(Clone, Default)]
pub(super) struct FailingSinkFactory {
    pub armed: Arc<AtomicBool>,
}

impl SinkFactory for FailingSinkFactory {
    fn create(&self, path: &Path) -> io::Result<Box<dyn ComponentSink>> {
        Ok(Box::new(FailingSink {
            inner: BufWriter::new(File::create(path)?),
            armed: Arc::clone(&self.armed),
        }))
    }
}

/// Creates every component on disk but silently drops the bytes written to
/// `Index.db`, so the table commits and then fails to open.
#[derive(Clone, Default)]
pub(super) struct LosingIndexSinkFactory;

struct DiscardingSink(File);

impl Write for DiscardingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ComponentSink for DiscardingSink {
    fn sync(&mut self) -> io::Result<()> {
        self.0.sync_all()
    }
}

impl SinkFactory for LosingIndexSinkFactory {
    fn create(&self, path: &Path) -> io::Result<Box<dyn ComponentSink>> {
        let file = File::create(path)?;
        if path.to_string_lossy().ends_with("Index.db") {
            Ok(Box::new(DiscardingSink(file)))
        } else {
            Ok(Box::new(BufWriter::new(file)))
        }
    }
}

// -------------------- Fixtures --------------------

/// Three people, three cells each: `age` (int), `first_name` (text),
/// `height` (long).
pub(super) fn people() -> Vec<Partition> {
    let rows = [
        ("key1", 27i32, "jason", 183i64),
        ("key2", 30, "pavel", 180),
        ("key3", 30, "jordan", 182),
    ];
    let mut partitions: Vec<Partition> = rows
        .iter()
        .map(|(key, age, name, height)| {
            Partition::new(DecoratedKey::new(key.as_bytes())).with(Row::new(
                Clustering::EMPTY,
                vec![
                    Cell::live("age", 1, age.to_be_bytes()),
                    Cell::live("first_name", 1, name.as_bytes()),
                    Cell::live("height", 1, height.to_be_bytes()),
                ],
            ))
        })
        .collect();
    partitions.sort_by(|a, b| a.key.cmp(&b.key));
    partitions
}

/// A partition with `rows` clustered rows of `width` value bytes each.
pub(super) fn wide_partition(key: &str, rows: usize, width: usize) -> Partition {
    let mut p = Partition::new(DecoratedKey::new(key.as_bytes()));
    for i in 0..rows {
        let clustering = Clustering::new([format!("c{:05}", i).into_bytes()]);
        p = p.with(Row::new(
            clustering,
            vec![Cell::live("v", i as i64, vec![b'x'; width])],
        ));
    }
    p
}

/// Lists every file in `dir`.
pub(super) fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
