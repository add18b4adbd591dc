//! # Memtable - sorted in-memory write buffer
//!
//! Buffers cells per partition and hands them to the sstable writer as a
//! stream of [`Partition`]s sorted by [`DecoratedKey`]. Conflicting writes to
//! the same cell are reconciled by timestamp: the newer write wins and an
//! equal timestamp keeps the first write.

mod partition;

pub use partition::{
    Cell, Clustering, DecoratedKey, DeletionTime, MarkerKind, Partition, RangeTombstoneMarker,
    Row, Unfiltered,
};

use std::collections::BTreeMap;

/// Cells of one row keyed by column name.
type Cells = BTreeMap<String, Cell>;

#[derive(Debug, Default)]
struct PartitionData {
    deletion: Option<DeletionTime>,
    static_cells: Cells,
    rows: BTreeMap<Clustering, Cells>,
    ranges: Vec<(Clustering, Clustering, DeletionTime)>,
}

#[derive(Debug)]
pub struct Memtable {
    partitions: BTreeMap<DecoratedKey, PartitionData>,
    approx_size: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            partitions: BTreeMap::new(),
            approx_size: 0,
        }
    }

    /// Writes a regular cell. Ignored if the stored cell is at least as new.
    pub fn put(&mut self, key: &[u8], clustering: Clustering, cell: Cell) {
        let data = self.partitions.entry(DecoratedKey::new(key)).or_default();
        let row = data.rows.entry(clustering).or_default();
        Self::reconcile(row, cell, &mut self.approx_size);
    }

    /// Writes a static cell. Ignored if the stored cell is at least as new.
    pub fn put_static(&mut self, key: &[u8], cell: Cell) {
        let data = self.partitions.entry(DecoratedKey::new(key)).or_default();
        Self::reconcile(&mut data.static_cells, cell, &mut self.approx_size);
    }

    /// Deletes the whole partition; the newest deletion wins.
    pub fn delete_partition(&mut self, key: &[u8], deletion: DeletionTime) {
        let data = self.partitions.entry(DecoratedKey::new(key)).or_default();
        match data.deletion {
            Some(old) if old.marked_for_delete_at >= deletion.marked_for_delete_at => {}
            _ => data.deletion = Some(deletion),
        }
    }

    /// Deletes the inclusive clustering range `[start, end]`.
    pub fn delete_range(
        &mut self,
        key: &[u8],
        start: Clustering,
        end: Clustering,
        deletion: DeletionTime,
    ) {
        let data = self.partitions.entry(DecoratedKey::new(key)).or_default();
        data.ranges.push((start, end, deletion));
    }

    fn reconcile(cells: &mut Cells, cell: Cell, approx_size: &mut usize) {
        match cells.get(&cell.column) {
            Some(old) if old.timestamp >= cell.timestamp => return,
            Some(old) => {
                if let Some(ref v) = old.value {
                    *approx_size = approx_size.saturating_sub(v.len());
                }
            }
            None => {}
        }
        if let Some(ref v) = cell.value {
            *approx_size += v.len();
        }
        cells.insert(cell.column.clone(), cell);
    }

    /// Returns the stored cell for `(key, clustering, column)`, tombstones included.
    pub fn get(&self, key: &[u8], clustering: &Clustering, column: &str) -> Option<&Cell> {
        self.partitions
            .get(&DecoratedKey::new(key))
            .and_then(|p| p.rows.get(clustering))
            .and_then(|row| row.get(column))
    }

    /// Materializes one partition.
    pub fn partition(&self, key: &[u8]) -> Option<Partition> {
        let key = DecoratedKey::new(key);
        self.partitions
            .get(&key)
            .map(|data| Self::build(key.clone(), data))
    }

    /// Partitions in ascending [`DecoratedKey`] order: the order the sstable
    /// writer requires.
    pub fn iter(&self) -> impl Iterator<Item = Partition> + '_ {
        self.partitions
            .iter()
            .map(|(key, data)| Self::build(key.clone(), data))
    }

    fn build(key: DecoratedKey, data: &PartitionData) -> Partition {
        let mut partition = Partition::new(key);
        if let Some(deletion) = data.deletion {
            partition = partition.with_deletion(deletion);
        }
        if !data.static_cells.is_empty() {
            partition = partition.with_static_row(Row::static_row(
                data.static_cells.values().cloned().collect(),
            ));
        }

        // Open markers sort before a row at the same clustering, close
        // markers after it.
        let mut units: Vec<(&Clustering, u8, Unfiltered)> = Vec::new();
        for (start, end, deletion) in &data.ranges {
            units.push((start, 0, RangeTombstoneMarker::open(start.clone(), *deletion).into()));
            units.push((end, 2, RangeTombstoneMarker::close(end.clone(), *deletion).into()));
        }
        for (clustering, cells) in &data.rows {
            let row = Row::new(clustering.clone(), cells.values().cloned().collect());
            units.push((clustering, 1, row.into()));
        }
        units.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(&b.1)));

        partition.unfiltereds = units.into_iter().map(|(_, _, u)| u).collect();
        partition
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Drops every buffered partition.
    pub fn clear(&mut self) {
        self.partitions.clear();
        self.approx_size = 0;
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
