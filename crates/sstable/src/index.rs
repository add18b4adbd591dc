//! Primary index entries and the per-partition column index.
//!
//! A partition larger than `column_index_size` gets a promoted index: the
//! clustering range, offset and width of each block of units, so a reader
//! can seek inside the partition instead of scanning it.

use memtable::Clustering;

/// One block of a partition's units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub first: Clustering,
    pub last: Clustering,
    /// Offset of the block from the start of the partition.
    pub offset: u64,
    pub width: u64,
}

/// What `Index.db` records for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowIndexEntry {
    pub data_position: u64,
    /// Empty unless the partition spans more than one block.
    pub columns_index: Vec<IndexInfo>,
}

impl RowIndexEntry {
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        !self.columns_index.is_empty()
    }
}

struct OpenBlock {
    first: Clustering,
    last: Clustering,
    start: u64,
}

/// Cuts a partition's clustered units into blocks of roughly `block_size`
/// bytes. Positions passed in are absolute `Data.db` offsets.
pub struct ColumnIndexBuilder {
    partition_start: u64,
    block_size: u64,
    blocks: Vec<IndexInfo>,
    open: Option<OpenBlock>,
}

impl ColumnIndexBuilder {
    pub fn new(partition_start: u64, block_size: u64) -> Self {
        Self {
            partition_start,
            block_size: block_size.max(1),
            blocks: Vec::new(),
            open: None,
        }
    }

    /// Records a unit spanning `[start, end)`.
    pub fn add(&mut self, clustering: &Clustering, start: u64, end: u64) {
        let block = self.open.get_or_insert_with(|| OpenBlock {
            first: clustering.clone(),
            last: Clustering::EMPTY,
            start,
        });
        block.last = clustering.clone();
        if end - block.start >= self.block_size {
            self.close(end);
        }
    }

    fn close(&mut self, end: u64) {
        if let Some(block) = self.open.take() {
            self.blocks.push(IndexInfo {
                first: block.first,
                last: block.last,
                offset: block.start - self.partition_start,
                width: end - block.start,
            });
        }
    }

    /// Closes the last block at `end`. A partition that fits in one block
    /// gets no promoted index.
    pub fn build(mut self, end: u64) -> Vec<IndexInfo> {
        self.close(end);
        if self.blocks.len() <= 1 {
            Vec::new()
        } else {
            self.blocks
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Clustering {
        Clustering::new([s.as_bytes()])
    }

    #[test]
    fn single_block_is_not_promoted() {
        let mut b = ColumnIndexBuilder::new(100, 1024);
        b.add(&c("a"), 120, 150);
        b.add(&c("b"), 150, 180);
        assert!(b.build(180).is_empty());
    }

    #[test]
    fn blocks_cover_the_partition() {
        let mut b = ColumnIndexBuilder::new(100, 50);
        b.add(&c("a"), 120, 150);
        b.add(&c("b"), 150, 180); // closes [120, 180)
        b.add(&c("c"), 180, 200);
        let blocks = b.build(200);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].first, c("a"));
        assert_eq!(blocks[0].last, c("b"));
        assert_eq!(blocks[0].offset, 20);
        assert_eq!(blocks[0].width, 60);
        assert_eq!(blocks[1].first, c("c"));
        assert_eq!(blocks[1].last, c("c"));
        assert_eq!(blocks[1].offset, 80);
        assert_eq!(blocks[1].width, 20);
    }

    #[test]
    fn empty_partition_has_no_blocks() {
        assert!(ColumnIndexBuilder::new(0, 10).build(0).is_empty());
    }
}
