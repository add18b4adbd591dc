use super::*;
use bloom::FilterKey;

fn ck(v: &str) -> Clustering {
    Clustering::new([v])
}

// -------------------- Keys --------------------

#[test]
fn decorated_keys_order_by_token_then_bytes() {
    let mut keys: Vec<DecoratedKey> = ["key1", "key2", "key3", "a", "zz"]
        .iter()
        .map(|k| DecoratedKey::new(k.as_bytes()))
        .collect();
    keys.sort();
    for pair in keys.windows(2) {
        assert!(pair[0].token() <= pair[1].token());
    }
}

#[test]
fn decorated_key_equality_ignores_cached_hash() {
    let a = DecoratedKey::new(b"key1".to_vec());
    let b = DecoratedKey::new(&b"key1"[..]);
    assert_eq!(a, b);
    assert_eq!(a.key(), b"key1");
    assert_eq!(a.filter_hash(), b"key1".filter_hash());
    assert_eq!(a.token(), a.filter_hash()[0] as i64);
}

// -------------------- Put / reconcile --------------------

#[test]
fn put_and_get_single_cell() {
    let mut m = Memtable::new();
    m.put(b"k1", ck("c"), Cell::live("v", 1, b"v1".to_vec()));
    assert_eq!(m.len(), 1);
    let cell = m.get(b"k1", &ck("c"), "v").unwrap();
    assert_eq!(cell.timestamp, 1);
    assert_eq!(cell.value.as_deref(), Some(&b"v1"[..]));
}

#[test]
fn put_overwrites_with_newer_timestamp() {
    let mut m = Memtable::new();
    m.put(b"k", ck("c"), Cell::live("v", 1, b"old".to_vec()));
    m.put(b"k", ck("c"), Cell::live("v", 2, b"new".to_vec()));
    assert_eq!(m.get(b"k", &ck("c"), "v").unwrap().value.as_deref(), Some(&b"new"[..]));
}

#[test]
fn put_ignores_stale_and_equal_timestamp() {
    let mut m = Memtable::new();
    m.put(b"k", ck("c"), Cell::live("v", 5, b"first".to_vec()));
    m.put(b"k", ck("c"), Cell::live("v", 3, b"stale".to_vec()));
    m.put(b"k", ck("c"), Cell::live("v", 5, b"second".to_vec()));
    assert_eq!(m.get(b"k", &ck("c"), "v").unwrap().value.as_deref(), Some(&b"first"[..]));
}

#[test]
fn tombstone_cell_shadows_value() {
    let mut m = Memtable::new();
    m.put(b"k", ck("c"), Cell::live("v", 1, b"x".to_vec()));
    m.put(b"k", ck("c"), Cell::tombstone("v", 2));
    assert!(m.get(b"k", &ck("c"), "v").unwrap().is_tombstone());
    assert_eq!(m.approx_size(), 0);
}

#[test]
fn approx_size_counts_values() {
    let mut m = Memtable::new();
    assert_eq!(m.approx_size(), 0);
    m.put(b"a", ck("c"), Cell::live("v", 1, b"aaa".to_vec()));
    assert_eq!(m.approx_size(), 3);
    m.put(b"a", ck("c"), Cell::live("v", 2, b"bb".to_vec()));
    assert_eq!(m.approx_size(), 2);
    m.put_static(b"a", Cell::live("s", 1, b"ssss".to_vec()));
    assert_eq!(m.approx_size(), 6);
}

#[test]
fn partition_deletion_keeps_newest() {
    let mut m = Memtable::new();
    m.delete_partition(b"k", DeletionTime::new(10, 100));
    m.delete_partition(b"k", DeletionTime::new(5, 50));
    let p = m.partition(b"k").unwrap();
    assert_eq!(p.deletion, DeletionTime::new(10, 100));
    assert!(!p.is_empty());
}

// -------------------- Partition stream --------------------

#[test]
fn iter_yields_partitions_in_key_order() {
    let mut m = Memtable::new();
    for k in ["key3", "key1", "key2", "alpha", "omega"] {
        m.put(k.as_bytes(), Clustering::EMPTY, Cell::live("v", 1, k.as_bytes().to_vec()));
    }
    let keys: Vec<DecoratedKey> = m.iter().map(|p| p.key).collect();
    assert_eq!(keys.len(), 5);
    for pair in keys.windows(2) {
        assert!(pair[0] < pair[1]);
    }
}

#[test]
fn rows_come_out_in_clustering_order_with_sorted_cells() {
    let mut m = Memtable::new();
    m.put(b"k", ck("b"), Cell::live("z", 1, b"1".to_vec()));
    m.put(b"k", ck("b"), Cell::live("a", 1, b"2".to_vec()));
    m.put(b"k", ck("a"), Cell::live("m", 1, b"3".to_vec()));

    let p = m.partition(b"k").unwrap();
    let clusterings: Vec<&Clustering> = p.unfiltereds.iter().map(Unfiltered::clustering).collect();
    assert_eq!(clusterings, vec![&ck("a"), &ck("b")]);

    match &p.unfiltereds[1] {
        Unfiltered::Row(row) => {
            let cols: Vec<&str> = row.iter().map(|c| c.column.as_str()).collect();
            assert_eq!(cols, vec!["a", "z"]);
        }
        other => panic!("expected row, got {:?}", other),
    }
}

#[test]
fn range_markers_bracket_rows() {
    let mut m = Memtable::new();
    m.put(b"k", ck("b"), Cell::live("v", 1, b"x".to_vec()));
    m.delete_range(b"k", ck("b"), ck("d"), DeletionTime::new(5, 1));
    m.put(b"k", ck("d"), Cell::live("v", 9, b"y".to_vec()));

    let p = m.partition(b"k").unwrap();
    let kinds: Vec<String> = p
        .unfiltereds
        .iter()
        .map(|u| match u {
            Unfiltered::Row(r) => format!("row:{}", String::from_utf8_lossy(&r.clustering.0[0])),
            Unfiltered::Marker(mk) => format!("{:?}", mk.kind),
        })
        .collect();
    assert_eq!(kinds, vec!["Open", "row:b", "row:d", "Close"]);
}

#[test]
fn static_cells_form_static_row() {
    let mut m = Memtable::new();
    m.put_static(b"k", Cell::live("s", 1, b"static".to_vec()));
    let p = m.partition(b"k").unwrap();
    let row = p.static_row.as_ref().unwrap();
    assert_eq!(row.clustering, Clustering::EMPTY);
    assert_eq!(row.cells().len(), 1);
    assert!(p.unfiltereds.is_empty());
    assert_eq!(p.cells().count(), 1);
}

#[test]
fn clear_resets_everything() {
    let mut m = Memtable::new();
    m.put(b"k", ck("c"), Cell::live("v", 1, b"x".to_vec()));
    m.clear();
    assert!(m.is_empty());
    assert_eq!(m.approx_size(), 0);
    assert!(m.partition(b"k").is_none());
}

// -------------------- Model helpers --------------------

#[test]
fn empty_partition_detection() {
    let key = DecoratedKey::new(b"k".to_vec());
    assert!(Partition::new(key.clone()).is_empty());
    assert!(Partition::new(key.clone())
        .with_static_row(Row::static_row(vec![]))
        .is_empty());
    assert!(!Partition::new(key)
        .with(Row::new(Clustering::EMPTY, vec![Cell::live("a", 1, b"1".to_vec())]))
        .is_empty());
}

#[test]
fn partition_cells_flatten_static_first() {
    let key = DecoratedKey::new(b"k".to_vec());
    let p = Partition::new(key)
        .with_static_row(Row::static_row(vec![Cell::live("s", 1, b"s".to_vec())]))
        .with(Row::new(ck("a"), vec![Cell::live("x", 1, b"1".to_vec())]))
        .with(RangeTombstoneMarker::open(ck("b"), DeletionTime::new(1, 1)))
        .with(Row::new(ck("c"), vec![Cell::live("y", 1, b"2".to_vec())]));
    let cols: Vec<&str> = p.cells().map(|c| c.column.as_str()).collect();
    assert_eq!(cols, vec!["s", "x", "y"]);
}
