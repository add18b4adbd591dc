//! # Bloom - Partition Key Filters
//!
//! Space-efficient approximate membership over partition-key hashes. A filter
//! can tell you with certainty that a key is **not** in a table (no false
//! negatives), but may occasionally report that a key **is** present when it
//! isn't (false positives, bounded by the configured chance).
//!
//! ## Filters in the write path
//!
//! The sstable writer sizes a filter from its estimated key count, adds every
//! partition key it writes, and serializes the result into the table's
//! `Filter.db` component on commit. Readers consult it before touching the
//! index so that lookups for absent keys cost no I/O.
//!
//! ## Memory model
//!
//! [`BloomFilter`] keeps its bits off the Rust heap in a single raw
//! allocation. Handles are reference counted: [`Filter::shared_copy`] hands
//! out another handle on the same bits and [`Filter::close`] (or dropping the
//! handle) releases one reference. The allocation is freed when the last
//! handle goes away.
//!
//! ## Wire formats
//!
//! ```text
//! Legacy:  hash_count (u32 BE) | word_count (u64 BE) | words (u64 BE)...
//! Current: hash_count (u32 LE) | word_count (u32 LE) | words (u64 LE)...
//! ```
//!
//! The format is chosen per call through [`SerializationFormat`]; filters
//! carry no format state of their own.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::{BloomFilter, Filter};
//!
//! let mut bf = BloomFilter::new(1000, 0.01).unwrap();
//! bf.add(b"hello");
//! assert!(bf.is_present(b"hello"));
//! ```

mod bitset;
mod error;
pub mod hash;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::fmt;
use std::io::{self, Read, Write};

use bitset::OffHeapBitSet;
pub use error::{FilterError, Result};

/// Upper bound on the number of hash functions a filter will use.
pub const MAX_HASH_COUNT: u32 = 20;

/// Safety cap: a filter should not exceed 128 MiB of bits.
pub const MAX_FILTER_BYTES: u64 = 128 * 1024 * 1024;

/// Anything that can be inserted into or probed against a [`Filter`].
///
/// Implementors report the murmur3 x64-128 hash of the key. The filter only
/// ever sees these two words, never the raw key.
pub trait FilterKey {
    fn filter_hash(&self) -> [u64; 2];
}

impl FilterKey for &[u8] {
    fn filter_hash(&self) -> [u64; 2] {
        hash::murmur3_x64_128(self, 0)
    }
}

impl FilterKey for Vec<u8> {
    fn filter_hash(&self) -> [u64; 2] {
        hash::murmur3_x64_128(self, 0)
    }
}

impl<const N: usize> FilterKey for [u8; N] {
    fn filter_hash(&self) -> [u64; 2] {
        hash::murmur3_x64_128(self, 0)
    }
}

/// Which on-disk encoding to use when sizing or writing a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationFormat {
    /// Big-endian encoding with a 64-bit word count, kept readable for old tables.
    Legacy,
    /// Little-endian encoding with a 32-bit word count.
    Current,
}

/// Approximate set membership over partition keys.
///
/// Mutation (`add`, `clear`) is only valid while the filter is being built or
/// while the caller has exclusive access. Once published, `is_present` may be
/// called from any number of threads.
pub trait Filter: Send + Sync + fmt::Debug {
    fn add(&mut self, key: &dyn FilterKey);

    /// `false` means the key was definitely never added.
    fn is_present(&self, key: &dyn FilterKey) -> bool;

    /// Zeroes the filter in place.
    ///
    /// # Panics
    ///
    /// Panics if other handles share the underlying memory.
    fn clear(&mut self);

    fn serialized_size(&self, format: SerializationFormat) -> u64;

    fn serialize(&self, out: &mut dyn Write, format: SerializationFormat) -> io::Result<()>;

    /// Returns another handle on the same bits without copying them.
    fn shared_copy(&self) -> Box<dyn Filter>;

    /// Releases this handle's reference. Calling it twice is a no-op.
    fn close(&mut self);

    /// Exact size in bytes of the off-heap allocation.
    fn off_heap_size(&self) -> u64;

    /// `false` for filters whose answers carry no information.
    fn is_informative(&self) -> bool;
}

/// A bloom filter over an off-heap bit set with `k` hash functions.
///
/// Uses double hashing: `h(i) = h1 + i * h2` where `h1` and `h2` are the two
/// words of the key's murmur3 hash.
pub struct BloomFilter {
    hash_count: u32,
    bitset: OffHeapBitSet,
}

impl BloomFilter {
    /// Creates an empty bloom filter sized for `expected_elements` with the
    /// given target `fp_chance`.
    ///
    /// Bits: `m = -n * ln(p) / ln(2)^2`, rounded up to whole 64-bit words.
    /// Hashes: `k = round(m / n * ln(2))`, capped at [`MAX_HASH_COUNT`].
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidParameters`] if `expected_elements` is 0,
    /// `fp_chance` is not in `(0, 1)`, the bit array would exceed
    /// [`MAX_FILTER_BYTES`], or the sizing yields zero hash functions.
    pub fn new(expected_elements: u64, fp_chance: f64) -> Result<Self> {
        if expected_elements == 0 {
            return Err(FilterError::InvalidParameters(
                "expected_elements must be > 0".into(),
            ));
        }
        if !(fp_chance > 0.0 && fp_chance < 1.0) {
            return Err(FilterError::InvalidParameters(format!(
                "fp_chance must be in (0, 1), got {}",
                fp_chance
            )));
        }

        let n = expected_elements as f64;
        let bits = (-n * fp_chance.ln() / std::f64::consts::LN_2.powi(2)).ceil();
        let words = (bits / 64.0).ceil().max(1.0) as u64;
        if words.saturating_mul(8) > MAX_FILTER_BYTES {
            return Err(FilterError::InvalidParameters(format!(
                "{} elements at fp_chance {} needs more than {} bytes",
                expected_elements, fp_chance, MAX_FILTER_BYTES
            )));
        }

        let m = (words * 64) as f64;
        let k = ((m / n) * std::f64::consts::LN_2).round().min(MAX_HASH_COUNT as f64) as u32;

        Self::with_parameters(k, words)
    }

    /// Creates an empty filter with an explicit hash count and word count.
    pub fn with_parameters(hash_count: u32, words: u64) -> Result<Self> {
        if hash_count == 0 {
            return Err(FilterError::InvalidParameters(
                "filter needs at least one hash function".into(),
            ));
        }
        if words == 0 {
            return Err(FilterError::InvalidParameters(
                "filter needs a non-empty bit array".into(),
            ));
        }
        if words.saturating_mul(8) > MAX_FILTER_BYTES {
            return Err(FilterError::InvalidParameters(format!(
                "bit array of {} words exceeds {} bytes",
                words, MAX_FILTER_BYTES
            )));
        }
        Ok(Self {
            hash_count,
            bitset: OffHeapBitSet::with_words(words as usize)?,
        })
    }

    /// Reads a filter written by [`Filter::serialize`] in `format`.
    pub fn deserialize<R: Read>(r: &mut R, format: SerializationFormat) -> Result<Self> {
        match format {
            SerializationFormat::Legacy => {
                let hash_count = r.read_u32::<BigEndian>()?;
                let words = r.read_u64::<BigEndian>()?;
                Self::read_bits::<BigEndian, R>(r, hash_count, words)
            }
            SerializationFormat::Current => {
                let hash_count = r.read_u32::<LittleEndian>()?;
                let words = r.read_u32::<LittleEndian>()? as u64;
                Self::read_bits::<LittleEndian, R>(r, hash_count, words)
            }
        }
    }

    fn read_bits<E: ByteOrder, R: Read>(r: &mut R, hash_count: u32, words: u64) -> Result<Self> {
        if hash_count == 0 || hash_count > MAX_HASH_COUNT {
            return Err(FilterError::Corrupt(format!("hash_count {}", hash_count)));
        }
        if words == 0 || words.saturating_mul(8) > MAX_FILTER_BYTES {
            return Err(FilterError::Corrupt(format!(
                "bit array of {} words (max {} bytes)",
                words, MAX_FILTER_BYTES
            )));
        }
        let filter = Self::with_parameters(hash_count, words)?;
        for i in 0..words as usize {
            filter.bitset.store_word(i, r.read_u64::<E>()?);
        }
        Ok(filter)
    }

    /// Returns the number of hash functions.
    #[must_use]
    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    /// Returns the number of bits in the filter.
    #[must_use]
    pub fn bit_count(&self) -> u64 {
        self.bitset.capacity()
    }

    /// Number of live handles sharing this filter's bits, `0` once closed.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.bitset.ref_count()
    }

    fn indexes(&self, key: &dyn FilterKey) -> impl Iterator<Item = u64> {
        let [base, inc] = key.filter_hash();
        let bits = self.bitset.capacity();
        (0..self.hash_count as u64).map(move |i| base.wrapping_add(i.wrapping_mul(inc)) % bits)
    }

    fn write_bits<E: ByteOrder>(&self, out: &mut dyn Write) -> io::Result<()> {
        for i in 0..self.bitset.word_count() {
            out.write_u64::<E>(self.bitset.word(i))?;
        }
        Ok(())
    }
}

impl Filter for BloomFilter {
    fn add(&mut self, key: &dyn FilterKey) {
        for idx in self.indexes(key) {
            self.bitset.set(idx);
        }
    }

    fn is_present(&self, key: &dyn FilterKey) -> bool {
        self.indexes(key).all(|idx| self.bitset.get(idx))
    }

    fn clear(&mut self) {
        self.bitset.clear();
    }

    fn serialized_size(&self, format: SerializationFormat) -> u64 {
        let bits = self.bitset.word_count() as u64 * 8;
        match format {
            SerializationFormat::Legacy => 4 + 8 + bits,
            SerializationFormat::Current => 4 + 4 + bits,
        }
    }

    fn serialize(&self, out: &mut dyn Write, format: SerializationFormat) -> io::Result<()> {
        let words = self.bitset.word_count();
        match format {
            SerializationFormat::Legacy => {
                out.write_u32::<BigEndian>(self.hash_count)?;
                out.write_u64::<BigEndian>(words as u64)?;
                self.write_bits::<BigEndian>(out)
            }
            SerializationFormat::Current => {
                out.write_u32::<LittleEndian>(self.hash_count)?;
                out.write_u32::<LittleEndian>(words as u32)?;
                self.write_bits::<LittleEndian>(out)
            }
        }
    }

    fn shared_copy(&self) -> Box<dyn Filter> {
        Box::new(BloomFilter {
            hash_count: self.hash_count,
            bitset: self.bitset.shared_copy(),
        })
    }

    fn close(&mut self) {
        self.bitset.close();
    }

    fn off_heap_size(&self) -> u64 {
        self.bitset.off_heap_size()
    }

    fn is_informative(&self) -> bool {
        true
    }
}

impl fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("BloomFilter");
        s.field("hash_count", &self.hash_count);
        if self.bitset.is_closed() {
            s.field("closed", &true);
        } else {
            s.field("bit_count", &self.bitset.capacity())
                .field("ref_count", &self.bitset.ref_count());
        }
        s.finish()
    }
}

/// The non-informative filter: every key may be present.
///
/// Used when a table was sized for no keys or configured with a
/// false-positive chance of 1.0. It owns no memory and serializes to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPresentFilter;

impl Filter for AlwaysPresentFilter {
    fn add(&mut self, _key: &dyn FilterKey) {}

    fn is_present(&self, _key: &dyn FilterKey) -> bool {
        true
    }

    fn clear(&mut self) {}

    fn serialized_size(&self, _format: SerializationFormat) -> u64 {
        0
    }

    fn serialize(&self, _out: &mut dyn Write, _format: SerializationFormat) -> io::Result<()> {
        Ok(())
    }

    fn shared_copy(&self) -> Box<dyn Filter> {
        Box::new(*self)
    }

    fn close(&mut self) {}

    fn off_heap_size(&self) -> u64 {
        0
    }

    fn is_informative(&self) -> bool {
        false
    }
}

/// Builds the filter a table with `expected_elements` keys should use.
///
/// Returns [`AlwaysPresentFilter`] when `fp_chance >= 1.0` or no keys are
/// expected, otherwise a [`BloomFilter`].
pub fn get_filter(expected_elements: u64, fp_chance: f64) -> Result<Box<dyn Filter>> {
    if fp_chance >= 1.0 || expected_elements == 0 {
        debug!(
            "using always-present filter (expected_elements={}, fp_chance={})",
            expected_elements, fp_chance
        );
        return Ok(Box::new(AlwaysPresentFilter));
    }
    let filter = BloomFilter::new(expected_elements, fp_chance)?;
    debug!("allocated {:?} ({} bytes off-heap)", filter, filter.off_heap_size());
    Ok(Box::new(filter))
}

/// Reads a serialized [`BloomFilter`] and returns it behind the trait.
pub fn deserialize<R: Read>(r: &mut R, format: SerializationFormat) -> Result<Box<dyn Filter>> {
    Ok(Box::new(BloomFilter::deserialize(r, format)?))
}
