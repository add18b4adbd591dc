//! Partition data model shared by the memtable and the sstable writer.
//!
//! A [`Partition`] is a [`DecoratedKey`], a partition-level deletion, an
//! optional static [`Row`] and a clustering-ordered sequence of
//! [`Unfiltered`] units (rows and range tombstone markers).

use bloom::hash::murmur3_x64_128;
use bloom::FilterKey;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A partition key together with its murmur3 hash.
///
/// Keys order by token (the first hash word as `i64`), then by raw bytes.
/// The cached hash doubles as the key's [`FilterKey`] hash.
#[derive(Clone)]
pub struct DecoratedKey {
    key: Vec<u8>,
    hash: [u64; 2],
}

impl DecoratedKey {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        let hash = murmur3_x64_128(&key, 0);
        Self { key, hash }
    }

    /// Raw partition key bytes.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    #[must_use]
    pub fn token(&self) -> i64 {
        self.hash[0] as i64
    }
}

impl FilterKey for DecoratedKey {
    fn filter_hash(&self) -> [u64; 2] {
        self.hash
    }
}

impl PartialEq for DecoratedKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DecoratedKey {}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token()
            .cmp(&other.token())
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for DecoratedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DecoratedKey({}, {})",
            self.token(),
            String::from_utf8_lossy(&self.key)
        )
    }
}

/// When (and from when) something was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionTime {
    /// Write timestamp of the deletion; data older than this is shadowed.
    pub marked_for_delete_at: i64,
    /// Server-local time of the deletion in seconds, used for purging.
    pub local_deletion_time: i32,
}

impl DeletionTime {
    /// No deletion.
    pub const LIVE: DeletionTime = DeletionTime {
        marked_for_delete_at: i64::MIN,
        local_deletion_time: i32::MAX,
    };

    pub fn new(marked_for_delete_at: i64, local_deletion_time: i32) -> Self {
        Self {
            marked_for_delete_at,
            local_deletion_time,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        *self == Self::LIVE
    }
}

impl Default for DeletionTime {
    fn default() -> Self {
        Self::LIVE
    }
}

/// The clustering prefix that orders rows inside a partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Clustering(pub Vec<Vec<u8>>);

impl Clustering {
    /// The clustering of a table without clustering columns.
    pub const EMPTY: Clustering = Clustering(Vec::new());

    pub fn new<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn values(&self) -> &[Vec<u8>] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One column value with its write timestamp.
///
/// `value == None` marks a cell tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub column: String,
    pub timestamp: i64,
    pub value: Option<Vec<u8>>,
}

impl Cell {
    pub fn live(column: impl Into<String>, timestamp: i64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            column: column.into(),
            timestamp,
            value: Some(value.into()),
        }
    }

    pub fn tombstone(column: impl Into<String>, timestamp: i64) -> Self {
        Self {
            column: column.into(),
            timestamp,
            value: None,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// A row: its clustering, an optional row deletion, and cells ordered by column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub clustering: Clustering,
    pub deletion: DeletionTime,
    cells: Vec<Cell>,
}

impl Row {
    /// Builds a row, ordering `cells` by column name.
    pub fn new(clustering: Clustering, mut cells: Vec<Cell>) -> Self {
        cells.sort_by(|a, b| a.column.cmp(&b.column));
        Self {
            clustering,
            deletion: DeletionTime::LIVE,
            cells,
        }
    }

    /// Builds the static row of a partition.
    pub fn static_row(cells: Vec<Cell>) -> Self {
        Self::new(Clustering::EMPTY, cells)
    }

    pub fn with_deletion(mut self, deletion: DeletionTime) -> Self {
        self.deletion = deletion;
        self
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.deletion.is_live()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Open,
    Close,
}

/// Opens or closes a deleted clustering range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstoneMarker {
    pub kind: MarkerKind,
    pub clustering: Clustering,
    pub deletion: DeletionTime,
}

impl RangeTombstoneMarker {
    pub fn open(clustering: Clustering, deletion: DeletionTime) -> Self {
        Self {
            kind: MarkerKind::Open,
            clustering,
            deletion,
        }
    }

    pub fn close(clustering: Clustering, deletion: DeletionTime) -> Self {
        Self {
            kind: MarkerKind::Close,
            clustering,
            deletion,
        }
    }
}

/// A clustered unit of a partition: a row or a range tombstone marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unfiltered {
    Row(Row),
    Marker(RangeTombstoneMarker),
}

impl Unfiltered {
    #[must_use]
    pub fn is_row(&self) -> bool {
        matches!(self, Unfiltered::Row(_))
    }

    #[must_use]
    pub fn clustering(&self) -> &Clustering {
        match self {
            Unfiltered::Row(row) => &row.clustering,
            Unfiltered::Marker(marker) => &marker.clustering,
        }
    }
}

impl From<Row> for Unfiltered {
    fn from(row: Row) -> Self {
        Unfiltered::Row(row)
    }
}

impl From<RangeTombstoneMarker> for Unfiltered {
    fn from(marker: RangeTombstoneMarker) -> Self {
        Unfiltered::Marker(marker)
    }
}

/// Everything stored under one partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub key: DecoratedKey,
    pub deletion: DeletionTime,
    pub static_row: Option<Row>,
    pub unfiltereds: Vec<Unfiltered>,
}

impl Partition {
    pub fn new(key: DecoratedKey) -> Self {
        Self {
            key,
            deletion: DeletionTime::LIVE,
            static_row: None,
            unfiltereds: Vec::new(),
        }
    }

    pub fn with_deletion(mut self, deletion: DeletionTime) -> Self {
        self.deletion = deletion;
        self
    }

    pub fn with_static_row(mut self, row: Row) -> Self {
        self.static_row = Some(row);
        self
    }

    /// Appends a row or marker. Units must be pushed in clustering order.
    pub fn with(mut self, unfiltered: impl Into<Unfiltered>) -> Self {
        self.unfiltereds.push(unfiltered.into());
        self
    }

    /// `true` when there is nothing to write: no deletion, no static row,
    /// no rows or markers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletion.is_live()
            && self.static_row.as_ref().map_or(true, Row::is_empty)
            && self.unfiltereds.is_empty()
    }

    /// Every cell of the partition, static row first.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.static_row
            .iter()
            .flat_map(Row::iter)
            .chain(self.unfiltereds.iter().flat_map(|u| match u {
                Unfiltered::Row(row) => row.cells(),
                Unfiltered::Marker(_) => &[][..],
            }))
    }
}
