use anyhow::{Context, Result};
use config::SSTableConfig;
use log::{debug, info};
use memtable::{Cell, Clustering, DecoratedKey, DeletionTime, Memtable, Partition, Row, Unfiltered};
use sstable::{flush_memtable, Descriptor, FlushObserver, SSTableReader};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Counts what a flush wrote and logs every partition position.
#[derive(Debug, Default)]
struct FlushLog {
    partitions: u64,
    cells: u64,
    complete: bool,
}

impl FlushObserver for FlushLog {
    fn start_partition(&mut self, key: &DecoratedKey, data_position: u64, index_position: u64) {
        self.partitions += 1;
        debug!(
            "partition {:?} at data {} index {}",
            key, data_position, index_position
        );
    }

    fn static_row(&mut self, row: &Row) {
        self.cells += row.cells().len() as u64;
    }

    fn next_unfiltered_cluster(&mut self, unfiltered: &Unfiltered) {
        if let Unfiltered::Row(row) = unfiltered {
            self.cells += row.cells().len() as u64;
        }
    }

    fn complete(&mut self) {
        self.complete = true;
    }
}

/// Result of a successful `FLUSH`.
#[derive(Debug, Clone)]
pub struct FlushSummary {
    pub table: String,
    pub partitions: u64,
    pub cells: u64,
}

/// One resolved cell of a `GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellView {
    pub is_static: bool,
    pub clustering: Clustering,
    pub column: String,
    pub value: Vec<u8>,
    pub timestamp: i64,
}

/// A memtable in front of the tables already flushed to `data_dir`.
pub struct Session {
    config: SSTableConfig,
    mem: Memtable,
    /// Oldest first.
    tables: Vec<SSTableReader>,
    next_generation: u64,
    last_timestamp: i64,
}

impl Session {
    /// Opens every committed table under `config.data_dir`.
    pub fn open(config: SSTableConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating {}", config.data_dir.display()))?;

        let mut tables = Vec::new();
        for descriptor in Descriptor::list_committed(&config.data_dir)? {
            let name = descriptor.to_string();
            tables.push(SSTableReader::open(descriptor).with_context(|| format!("opening {}", name))?);
        }
        let next_generation = Descriptor::next_generation(&config.data_dir)?;
        info!(
            "opened {} tables in {} (next generation {})",
            tables.len(),
            config.data_dir.display(),
            next_generation
        );

        Ok(Self {
            config,
            mem: Memtable::new(),
            tables,
            next_generation,
            last_timestamp: 0,
        })
    }

    /// Microseconds since the epoch, strictly increasing within a session.
    fn next_timestamp(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        self.last_timestamp = now.max(self.last_timestamp + 1);
        self.last_timestamp
    }

    pub fn put(&mut self, key: &[u8], column: &str, value: &[u8]) {
        let ts = self.next_timestamp();
        self.mem.put(key, Clustering::EMPTY, Cell::live(column, ts, value));
    }

    pub fn put_static(&mut self, key: &[u8], column: &str, value: &[u8]) {
        let ts = self.next_timestamp();
        self.mem.put_static(key, Cell::live(column, ts, value));
    }

    pub fn delete(&mut self, key: &[u8]) {
        let ts = self.next_timestamp();
        let local = (ts / 1_000_000).clamp(0, i32::MAX as i64) as i32;
        self.mem.delete_partition(key, DeletionTime::new(ts, local));
    }

    /// Writes the memtable to a new table. `None` if there was nothing to flush.
    pub fn flush(&mut self) -> Result<Option<FlushSummary>> {
        if self.mem.is_empty() {
            return Ok(None);
        }
        let descriptor = Descriptor::from_config(&self.config, self.next_generation)?;
        let mut log = FlushLog::default();
        let reader = flush_memtable(
            &self.mem,
            descriptor,
            &self.config,
            [&mut log as &mut dyn FlushObserver],
        )?;
        debug_assert!(log.complete);

        let summary = FlushSummary {
            table: reader.descriptor().to_string(),
            partitions: log.partitions,
            cells: log.cells,
        };
        self.tables.push(reader);
        self.next_generation += 1;
        self.mem.clear();
        Ok(Some(summary))
    }

    /// Live cells of `key` across the memtable and every table, newest
    /// write winning and partition deletions applied.
    pub fn get(&self, key: &[u8]) -> Result<Vec<CellView>> {
        let mut sources: Vec<Partition> = Vec::new();
        for table in &self.tables {
            if let Some(p) = table.partition(key)? {
                sources.push(p);
            }
        }
        if let Some(p) = self.mem.partition(key) {
            sources.push(p);
        }

        let deleted_at = sources
            .iter()
            .filter(|p| !p.deletion.is_live())
            .map(|p| p.deletion.marked_for_delete_at)
            .max();

        let mut cells: BTreeMap<(bool, Clustering, String), Cell> = BTreeMap::new();
        let mut merge = |is_static: bool, clustering: &Clustering, cell: &Cell| {
            let slot = (is_static, clustering.clone(), cell.column.clone());
            match cells.get(&slot) {
                Some(old) if old.timestamp >= cell.timestamp => {}
                _ => {
                    cells.insert(slot, cell.clone());
                }
            }
        };
        for p in &sources {
            if let Some(row) = &p.static_row {
                for cell in row.iter() {
                    merge(true, &Clustering::EMPTY, cell);
                }
            }
            for unit in &p.unfiltereds {
                if let Unfiltered::Row(row) = unit {
                    for cell in row.iter() {
                        merge(false, &row.clustering, cell);
                    }
                }
            }
        }

        Ok(cells
            .into_iter()
            .filter(|(_, cell)| deleted_at.map_or(true, |d| cell.timestamp > d))
            .filter_map(|((is_static, clustering, column), cell)| {
                cell.value.map(|value| CellView {
                    is_static,
                    clustering,
                    column,
                    value,
                    timestamp: cell.timestamp,
                })
            })
            .collect())
    }

    /// Filter answer of every table for `key`, oldest table first.
    pub fn probe(&self, key: &[u8]) -> Vec<(String, bool)> {
        self.tables
            .iter()
            .map(|t| (t.descriptor().to_string(), t.may_contain(key)))
            .collect()
    }

    /// Every partition key known to the session, in partitioner order.
    pub fn keys(&self) -> Vec<DecoratedKey> {
        let mut keys: BTreeSet<DecoratedKey> = self.tables.iter().flat_map(|t| t.keys().cloned()).collect();
        keys.extend(self.mem.iter().map(|p| p.key));
        keys.into_iter().collect()
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "memtable: {} partitions, ~{} bytes",
            self.mem.len(),
            self.mem.approx_size()
        )?;
        writeln!(f, "tables: {}", self.tables.len())?;
        for t in &self.tables {
            let s = t.stats();
            writeln!(
                f,
                "  {}: {} partitions, {} rows, {} cells, {} tombstones, filter {} bytes",
                t.descriptor(),
                s.partition_count,
                s.row_count,
                s.cell_count,
                s.tombstone_count,
                t.filter().off_heap_size()
            )?;
        }
        Ok(())
    }
}
