//! Binary encodings for the `Data.db` and `Index.db` components.
//!
//! ## Data.db, one partition
//!
//! ```text
//! [key_len: u16][key][marked_for_delete_at: i64][local_deletion_time: i32][flags: u8]
//! [kind: u8][body_len: u32][crc32: u32][body]      repeated, static row first
//! [kind: u8 = 0]                                   end of partition
//! ```
//!
//! `flags` bit 0 is set when a static row follows. Unit kinds are
//! [`KIND_STATIC_ROW`], [`KIND_ROW`] and [`KIND_MARKER`]. The CRC32 covers
//! the body only.
//!
//! Unit bodies:
//!
//! ```text
//! row:     [clustering][deletion][cell_count: u32][cell]...
//! cell:    [name_len: u16][name][timestamp: i64][flags: u8] [value_len: u32][value]  (value unless tombstone)
//! marker:  [bound: u8 (0 open, 1 close)][clustering][deletion]
//! clustering: [count: u16] ([len: u32][bytes])...
//! ```
//!
//! ## Index.db, one entry per partition
//!
//! ```text
//! [key_len: u16][key][data_position: u64][promoted_len: u32][promoted index]
//! promoted index: [count: u32] ([first clustering][last clustering][offset: u64][width: u64])...
//! ```
//!
//! All integers are little-endian.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{
    Cell, Clustering, DecoratedKey, DeletionTime, MarkerKind, Partition, RangeTombstoneMarker,
    Row, Unfiltered,
};
use std::io::{self, Read, Write};

use crate::error::{corrupt, Result, SSTableError};
use crate::index::{IndexInfo, RowIndexEntry};

pub const KIND_END_OF_PARTITION: u8 = 0;
pub const KIND_STATIC_ROW: u8 = 1;
pub const KIND_ROW: u8 = 2;
pub const KIND_MARKER: u8 = 3;

const FLAG_HAS_STATIC: u8 = 0x01;
const CELL_FLAG_TOMBSTONE: u8 = 0x01;

/// Largest partition key that fits the `u16` length prefix.
pub const MAX_KEY_BYTES: usize = u16::MAX as usize;
/// Maximum unit body we'll allocate during reads. Prevents OOM on corrupt files.
pub const MAX_UNIT_BYTES: usize = 64 * 1024 * 1024;
/// Maximum promoted index we'll allocate during reads.
pub const MAX_PROMOTED_BYTES: usize = 16 * 1024 * 1024;

/// Bytes taken by a unit header: kind + body_len + crc32.
pub const UNIT_HEADER_BYTES: u64 = 1 + 4 + 4;

fn too_large(what: &str, len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} of {} bytes does not fit its length prefix", what, len),
    )
}

fn len_u16(what: &str, len: usize) -> io::Result<u16> {
    u16::try_from(len).map_err(|_| too_large(what, len))
}

fn len_u32(what: &str, len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| too_large(what, len))
}

// -------------------- Encoding --------------------

pub fn write_deletion<W: Write>(w: &mut W, d: &DeletionTime) -> io::Result<()> {
    w.write_i64::<LittleEndian>(d.marked_for_delete_at)?;
    w.write_i32::<LittleEndian>(d.local_deletion_time)?;
    Ok(())
}

pub fn write_clustering<W: Write>(w: &mut W, c: &Clustering) -> io::Result<()> {
    w.write_u16::<LittleEndian>(len_u16("clustering", c.values().len())?)?;
    for v in c.values() {
        w.write_u32::<LittleEndian>(len_u32("clustering value", v.len())?)?;
        w.write_all(v)?;
    }
    Ok(())
}

fn write_cell<W: Write>(w: &mut W, cell: &Cell) -> io::Result<()> {
    w.write_u16::<LittleEndian>(len_u16("column name", cell.column.len())?)?;
    w.write_all(cell.column.as_bytes())?;
    w.write_i64::<LittleEndian>(cell.timestamp)?;
    match &cell.value {
        Some(v) => {
            w.write_u8(0)?;
            w.write_u32::<LittleEndian>(len_u32("cell value", v.len())?)?;
            w.write_all(v)?;
        }
        None => w.write_u8(CELL_FLAG_TOMBSTONE)?,
    }
    Ok(())
}

/// Encodes a row body (static or clustered) into `buf`, replacing its contents.
pub fn encode_row(buf: &mut Vec<u8>, row: &Row) -> io::Result<()> {
    buf.clear();
    write_clustering(buf, &row.clustering)?;
    write_deletion(buf, &row.deletion)?;
    buf.write_u32::<LittleEndian>(len_u32("cell count", row.cells().len())?)?;
    for cell in row.iter() {
        write_cell(buf, cell)?;
    }
    Ok(())
}

pub fn encode_marker(buf: &mut Vec<u8>, m: &RangeTombstoneMarker) -> io::Result<()> {
    buf.clear();
    buf.write_u8(match m.kind {
        MarkerKind::Open => 0,
        MarkerKind::Close => 1,
    })?;
    write_clustering(buf, &m.clustering)?;
    write_deletion(buf, &m.deletion)?;
    Ok(())
}

/// Encodes `u` into `buf` and returns its unit kind.
pub fn encode_unfiltered(buf: &mut Vec<u8>, u: &Unfiltered) -> io::Result<u8> {
    match u {
        Unfiltered::Row(row) => {
            encode_row(buf, row)?;
            Ok(KIND_ROW)
        }
        Unfiltered::Marker(m) => {
            encode_marker(buf, m)?;
            Ok(KIND_MARKER)
        }
    }
}

/// Writes the partition header. Returns the number of bytes written.
pub fn write_partition_header<W: Write>(
    w: &mut W,
    key: &DecoratedKey,
    deletion: &DeletionTime,
    has_static: bool,
) -> Result<u64> {
    let k = key.key();
    if k.len() > MAX_KEY_BYTES {
        return Err(SSTableError::KeyTooLarge(k.len()));
    }
    w.write_u16::<LittleEndian>(k.len() as u16)?;
    w.write_all(k)?;
    write_deletion(w, deletion)?;
    w.write_u8(if has_static { FLAG_HAS_STATIC } else { 0 })?;
    Ok(2 + k.len() as u64 + 12 + 1)
}

/// Frames an encoded body as `[kind][len][crc32][body]`. Returns the bytes written.
pub fn write_unit<W: Write>(w: &mut W, kind: u8, body: &[u8]) -> io::Result<u64> {
    let mut hasher = Crc32::new();
    hasher.update(body);
    let crc = hasher.finalize();

    w.write_u8(kind)?;
    w.write_u32::<LittleEndian>(len_u32("unit body", body.len())?)?;
    w.write_u32::<LittleEndian>(crc)?;
    w.write_all(body)?;
    Ok(UNIT_HEADER_BYTES + body.len() as u64)
}

pub fn write_end_of_partition<W: Write>(w: &mut W) -> io::Result<u64> {
    w.write_u8(KIND_END_OF_PARTITION)?;
    Ok(1)
}

pub fn write_index_entry<W: Write>(
    w: &mut W,
    key: &DecoratedKey,
    entry: &RowIndexEntry,
) -> Result<u64> {
    let k = key.key();
    if k.len() > MAX_KEY_BYTES {
        return Err(SSTableError::KeyTooLarge(k.len()));
    }

    let mut promoted = Vec::new();
    if !entry.columns_index.is_empty() {
        promoted.write_u32::<LittleEndian>(len_u32("promoted index", entry.columns_index.len())?)?;
        for info in &entry.columns_index {
            write_clustering(&mut promoted, &info.first)?;
            write_clustering(&mut promoted, &info.last)?;
            promoted.write_u64::<LittleEndian>(info.offset)?;
            promoted.write_u64::<LittleEndian>(info.width)?;
        }
    }

    w.write_u16::<LittleEndian>(k.len() as u16)?;
    w.write_all(k)?;
    w.write_u64::<LittleEndian>(entry.data_position)?;
    w.write_u32::<LittleEndian>(len_u32("promoted index", promoted.len())?)?;
    w.write_all(&promoted)?;
    Ok(2 + k.len() as u64 + 8 + 4 + promoted.len() as u64)
}

// -------------------- Decoding --------------------

/// Takes `len` bytes off the front of `buf`, refusing to read past its end.
fn take<'a>(buf: &mut &'a [u8], len: usize, component: &'static str) -> Result<&'a [u8]> {
    if len > buf.len() {
        return Err(corrupt(
            component,
            format!("length {} exceeds remaining {} bytes", len, buf.len()),
        ));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn read_deletion<R: Read>(r: &mut R) -> io::Result<DeletionTime> {
    let marked_for_delete_at = r.read_i64::<LittleEndian>()?;
    let local_deletion_time = r.read_i32::<LittleEndian>()?;
    Ok(DeletionTime::new(marked_for_delete_at, local_deletion_time))
}

fn read_clustering(buf: &mut &[u8], component: &'static str) -> Result<Clustering> {
    let count = buf.read_u16::<LittleEndian>()? as usize;
    let mut values = Vec::with_capacity(count.min(buf.len()));
    for _ in 0..count {
        let len = buf.read_u32::<LittleEndian>()? as usize;
        values.push(take(buf, len, component)?.to_vec());
    }
    Ok(Clustering(values))
}

fn read_cell(buf: &mut &[u8]) -> Result<Cell> {
    let name_len = buf.read_u16::<LittleEndian>()? as usize;
    let name = take(buf, name_len, "Data.db")?;
    let column = String::from_utf8(name.to_vec())
        .map_err(|_| corrupt("Data.db", "column name is not UTF-8"))?;
    let timestamp = buf.read_i64::<LittleEndian>()?;
    let flags = buf.read_u8()?;
    if flags & CELL_FLAG_TOMBSTONE != 0 {
        return Ok(Cell::tombstone(column, timestamp));
    }
    let value_len = buf.read_u32::<LittleEndian>()? as usize;
    let value = take(buf, value_len, "Data.db")?;
    Ok(Cell::live(column, timestamp, value))
}

fn decode_row(mut body: &[u8]) -> Result<Row> {
    let buf = &mut body;
    let clustering = read_clustering(buf, "Data.db")?;
    let deletion = read_deletion(buf)?;
    let count = buf.read_u32::<LittleEndian>()? as usize;
    let mut cells = Vec::with_capacity(count.min(buf.len()));
    for _ in 0..count {
        cells.push(read_cell(buf)?);
    }
    if !buf.is_empty() {
        return Err(corrupt("Data.db", format!("{} trailing bytes in row", buf.len())));
    }
    Ok(Row::new(clustering, cells).with_deletion(deletion))
}

fn decode_marker(mut body: &[u8]) -> Result<RangeTombstoneMarker> {
    let buf = &mut body;
    let bound = buf.read_u8()?;
    let clustering = read_clustering(buf, "Data.db")?;
    let deletion = read_deletion(buf)?;
    match bound {
        0 => Ok(RangeTombstoneMarker::open(clustering, deletion)),
        1 => Ok(RangeTombstoneMarker::close(clustering, deletion)),
        other => Err(corrupt("Data.db", format!("unknown marker bound {}", other))),
    }
}

/// Reads one partition starting at `offset` (the partition's data position).
///
/// Every unit's CRC32 is verified.
pub fn read_partition<R: Read>(r: &mut R, offset: u64) -> Result<Partition> {
    let key_len = r.read_u16::<LittleEndian>()? as usize;
    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key)?;
    let deletion = read_deletion(r)?;
    let flags = r.read_u8()?;

    let mut partition = Partition::new(DecoratedKey::new(key)).with_deletion(deletion);
    let mut pos = offset + 2 + key_len as u64 + 12 + 1;
    let mut body = Vec::new();
    let mut first = true;

    loop {
        let unit_offset = pos;
        let kind = r.read_u8()?;
        if kind == KIND_END_OF_PARTITION {
            break;
        }
        let len = r.read_u32::<LittleEndian>()? as usize;
        if len > MAX_UNIT_BYTES {
            return Err(corrupt(
                "Data.db",
                format!("unit of {} bytes at offset {} exceeds maximum {}", len, unit_offset, MAX_UNIT_BYTES),
            ));
        }
        let expected = r.read_u32::<LittleEndian>()?;
        body.resize(len, 0);
        r.read_exact(&mut body)?;

        let mut hasher = Crc32::new();
        hasher.update(&body);
        let actual = hasher.finalize();
        if actual != expected {
            return Err(SSTableError::CrcMismatch {
                offset: unit_offset,
                expected,
                actual,
            });
        }
        pos += UNIT_HEADER_BYTES + len as u64;

        match kind {
            KIND_STATIC_ROW if first && flags & FLAG_HAS_STATIC != 0 => {
                partition = partition.with_static_row(decode_row(&body)?);
            }
            KIND_ROW => partition = partition.with(decode_row(&body)?),
            KIND_MARKER => partition = partition.with(decode_marker(&body)?),
            other => {
                return Err(corrupt(
                    "Data.db",
                    format!("unexpected unit kind {} at offset {}", other, unit_offset),
                ))
            }
        }
        first = false;
    }

    if flags & FLAG_HAS_STATIC != 0 && partition.static_row.is_none() {
        return Err(corrupt("Data.db", format!("partition at {} lost its static row", offset)));
    }
    Ok(partition)
}

/// Reads one index entry. Returns `None` at a clean end of file.
pub fn read_index_entry<R: Read>(r: &mut R) -> Result<Option<(DecoratedKey, RowIndexEntry)>> {
    let key_len = match r.read_u16::<LittleEndian>() {
        Ok(n) => n as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key)?;
    let data_position = r.read_u64::<LittleEndian>()?;
    let promoted_len = r.read_u32::<LittleEndian>()? as usize;
    if promoted_len > MAX_PROMOTED_BYTES {
        return Err(corrupt(
            "Index.db",
            format!("promoted index of {} bytes exceeds maximum {}", promoted_len, MAX_PROMOTED_BYTES),
        ));
    }
    let mut promoted = vec![0u8; promoted_len];
    r.read_exact(&mut promoted)?;

    let mut columns_index = Vec::new();
    if promoted_len > 0 {
        let buf = &mut promoted.as_slice();
        let count = buf.read_u32::<LittleEndian>()? as usize;
        columns_index.reserve(count.min(buf.len()));
        for _ in 0..count {
            let first = read_clustering(buf, "Index.db")?;
            let last = read_clustering(buf, "Index.db")?;
            let offset = buf.read_u64::<LittleEndian>()?;
            let width = buf.read_u64::<LittleEndian>()?;
            columns_index.push(IndexInfo {
                first,
                last,
                offset,
                width,
            });
        }
    }

    Ok(Some((
        DecoratedKey::new(key),
        RowIndexEntry {
            data_position,
            columns_index,
        },
    )))
}
