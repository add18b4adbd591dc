//! `Statistics.db`: table-wide counters gathered while writing.
//!
//! ```text
//! [partitions: u64][rows: u64][cells: u64][tombstones: u64]
//! [min_timestamp: i64][max_timestamp: i64]
//! [first_key_len: u16][first_key][last_key_len: u16][last_key]
//! [bloom_fp_chance: f64]
//! [crc32: u32]                       over everything above
//! [magic: u32 = "SST4"]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{DecoratedKey, Partition, Row, Unfiltered};
use std::io::{Read, Write};

use crate::error::{corrupt, Result, SSTableError};
use crate::format::MAX_KEY_BYTES;

/// Magic number closing a statistics component (ASCII "SST4").
pub const STATS_MAGIC: u32 = 0x5353_5434;

#[derive(Debug, Clone, PartialEq)]
pub struct StatsMetadata {
    pub partition_count: u64,
    pub row_count: u64,
    pub cell_count: u64,
    pub tombstone_count: u64,
    /// `i64::MAX` when nothing carried a timestamp.
    pub min_timestamp: i64,
    /// `i64::MIN` when nothing carried a timestamp.
    pub max_timestamp: i64,
    pub first_key: Vec<u8>,
    pub last_key: Vec<u8>,
    pub bloom_fp_chance: f64,
}

impl StatsMetadata {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut body = Vec::with_capacity(64 + self.first_key.len() + self.last_key.len());
        body.write_u64::<LittleEndian>(self.partition_count)?;
        body.write_u64::<LittleEndian>(self.row_count)?;
        body.write_u64::<LittleEndian>(self.cell_count)?;
        body.write_u64::<LittleEndian>(self.tombstone_count)?;
        body.write_i64::<LittleEndian>(self.min_timestamp)?;
        body.write_i64::<LittleEndian>(self.max_timestamp)?;
        for key in [&self.first_key, &self.last_key] {
            if key.len() > MAX_KEY_BYTES {
                return Err(SSTableError::KeyTooLarge(key.len()));
            }
            body.write_u16::<LittleEndian>(key.len() as u16)?;
            body.write_all(key)?;
        }
        body.write_f64::<LittleEndian>(self.bloom_fp_chance)?;

        let mut hasher = Crc32::new();
        hasher.update(&body);

        w.write_all(&body)?;
        w.write_u32::<LittleEndian>(hasher.finalize())?;
        w.write_u32::<LittleEndian>(STATS_MAGIC)?;
        Ok(())
    }

    /// Reads and verifies a whole statistics component.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut raw = Vec::new();
        r.read_to_end(&mut raw)?;
        if raw.len() < 8 {
            return Err(corrupt("Statistics.db", "file too small"));
        }
        let (body, trailer) = raw.split_at(raw.len() - 8);
        let mut trailer = trailer;
        let expected = trailer.read_u32::<LittleEndian>()?;
        let magic = trailer.read_u32::<LittleEndian>()?;
        if magic != STATS_MAGIC {
            return Err(corrupt("Statistics.db", format!("bad magic {:#x}", magic)));
        }
        let mut hasher = Crc32::new();
        hasher.update(body);
        let actual = hasher.finalize();
        if actual != expected {
            return Err(SSTableError::CrcMismatch {
                offset: body.len() as u64,
                expected,
                actual,
            });
        }

        let mut b = body;
        let partition_count = b.read_u64::<LittleEndian>()?;
        let row_count = b.read_u64::<LittleEndian>()?;
        let cell_count = b.read_u64::<LittleEndian>()?;
        let tombstone_count = b.read_u64::<LittleEndian>()?;
        let min_timestamp = b.read_i64::<LittleEndian>()?;
        let max_timestamp = b.read_i64::<LittleEndian>()?;
        let first_key = read_key(&mut b)?;
        let last_key = read_key(&mut b)?;
        let bloom_fp_chance = b.read_f64::<LittleEndian>()?;

        Ok(Self {
            partition_count,
            row_count,
            cell_count,
            tombstone_count,
            min_timestamp,
            max_timestamp,
            first_key,
            last_key,
            bloom_fp_chance,
        })
    }
}

fn read_key(b: &mut &[u8]) -> Result<Vec<u8>> {
    let len = b.read_u16::<LittleEndian>()? as usize;
    let mut key = vec![0u8; len];
    b.read_exact(&mut key)?;
    Ok(key)
}

/// Accumulates [`StatsMetadata`] as partitions are appended.
#[derive(Debug)]
pub struct StatsCollector {
    stats: StatsMetadata,
}

impl StatsCollector {
    pub fn new(bloom_fp_chance: f64) -> Self {
        Self {
            stats: StatsMetadata {
                partition_count: 0,
                row_count: 0,
                cell_count: 0,
                tombstone_count: 0,
                min_timestamp: i64::MAX,
                max_timestamp: i64::MIN,
                first_key: Vec::new(),
                last_key: Vec::new(),
                bloom_fp_chance,
            },
        }
    }

    fn timestamp(&mut self, ts: i64) {
        self.stats.min_timestamp = self.stats.min_timestamp.min(ts);
        self.stats.max_timestamp = self.stats.max_timestamp.max(ts);
    }

    fn row(&mut self, row: &Row) {
        self.stats.row_count += 1;
        if !row.deletion.is_live() {
            self.stats.tombstone_count += 1;
            self.timestamp(row.deletion.marked_for_delete_at);
        }
        for cell in row.iter() {
            self.stats.cell_count += 1;
            if cell.is_tombstone() {
                self.stats.tombstone_count += 1;
            }
            self.timestamp(cell.timestamp);
        }
    }

    pub fn update(&mut self, key: &DecoratedKey, partition: &Partition) {
        if self.stats.partition_count == 0 {
            self.stats.first_key = key.key().to_vec();
        }
        self.stats.last_key = key.key().to_vec();
        self.stats.partition_count += 1;

        if !partition.deletion.is_live() {
            self.stats.tombstone_count += 1;
            self.timestamp(partition.deletion.marked_for_delete_at);
        }
        if let Some(row) = &partition.static_row {
            self.row(row);
        }
        for unit in &partition.unfiltereds {
            match unit {
                Unfiltered::Row(row) => self.row(row),
                Unfiltered::Marker(m) => {
                    self.stats.tombstone_count += 1;
                    self.timestamp(m.deletion.marked_for_delete_at);
                }
            }
        }
    }

    #[must_use]
    pub fn partition_count(&self) -> u64 {
        self.stats.partition_count
    }

    pub fn finish(self) -> StatsMetadata {
        self.stats
    }
}
