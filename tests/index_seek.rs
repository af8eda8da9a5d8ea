//! Secondary-index range scans: fixed-key and general indexes, duplicate
//! keys, global indexes shared across tables, and entry removal.

use stonetable::{RecordBuilder, SchemaIndexDef, SeekKey, Store, TableSchema};
use tempfile::tempdir;

fn schema_with_indexes() -> TableSchema {
    TableSchema::new(SchemaIndexDef::new_general("pk", 0, 1, false).unwrap())
        .unwrap()
        .with_index(SchemaIndexDef::new_general("by-name", 1, 1, false).unwrap())
        .unwrap()
        .with_index(SchemaIndexDef::new_fixed("by-num", 2))
        .unwrap()
}

fn record(key: &str, name: &str, num: u64) -> RecordBuilder {
    let mut builder = RecordBuilder::new();
    builder
        .add_field(key.as_bytes())
        .add_field(name.as_bytes())
        .add_field(&num.to_le_bytes());
    builder
}

#[test]
fn fixed_index_groups_records_by_key() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema_with_indexes();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    // three records under 7, one under 9
    table.insert(&record("a", "n1", 7)).unwrap();
    table.insert(&record("b", "n2", 7)).unwrap();
    table.insert(&record("c", "n3", 7)).unwrap();
    table.insert(&record("d", "n4", 9)).unwrap();

    let mut iter = table.seek("by-num", &7u64.to_le_bytes()).unwrap();

    let group = iter.next().unwrap().unwrap();
    assert_eq!(group.key, SeekKey::Fixed(7));
    let mut keys: Vec<Vec<u8>> = group
        .records
        .map(|r| r.unwrap().field(0).unwrap().to_vec())
        .collect();
    keys.sort();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    let group = iter.next().unwrap().unwrap();
    assert_eq!(group.key, SeekKey::Fixed(9));
    assert_eq!(group.records.count(), 1);

    assert!(iter.next().is_none());
}

#[test]
fn fixed_index_seek_starts_at_lower_bound() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema_with_indexes();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    for (i, num) in [10u64, 20, 30, 40].iter().enumerate() {
        table
            .insert(&record(&format!("k{}", i), "n", *num))
            .unwrap();
    }

    let keys: Vec<u64> = table
        .seek("by-num", &15u64.to_le_bytes())
        .unwrap()
        .map(|g| match g.unwrap().key {
            SeekKey::Fixed(n) => n,
            SeekKey::Bytes(_) => panic!("fixed index yielded a byte key"),
        })
        .collect();
    assert_eq!(keys, vec![20, 30, 40]);

    assert!(
        table
            .seek("by-num", &41u64.to_le_bytes())
            .unwrap()
            .next()
            .is_none()
    );
}

#[test]
fn general_index_iterates_keys_in_byte_order() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema_with_indexes();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    table.insert(&record("1", "walrus", 1)).unwrap();
    table.insert(&record("2", "aardvark", 2)).unwrap();
    table.insert(&record("3", "meerkat", 3)).unwrap();
    table.insert(&record("4", "meerkat", 4)).unwrap();

    let mut groups = Vec::new();
    for entry in table.seek("by-name", b"m").unwrap() {
        let entry = entry.unwrap();
        let SeekKey::Bytes(key) = entry.key else {
            panic!("general index yielded a fixed key");
        };
        groups.push((key.to_vec(), entry.records.count()));
    }

    assert_eq!(
        groups,
        vec![(b"meerkat".to_vec(), 2), (b"walrus".to_vec(), 1)]
    );
}

#[test]
fn global_index_spans_tables() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();

    let make_schema = |pk: &str| {
        TableSchema::new(SchemaIndexDef::new_general(pk, 0, 1, false).unwrap())
            .unwrap()
            .with_index(SchemaIndexDef::new_general("by-tag", 1, 1, true).unwrap())
            .unwrap()
    };
    let schema_a = make_schema("pk");
    let schema_b = make_schema("pk");

    let mut txn = store.begin();
    txn.create_table(&schema_a, "left").unwrap();
    txn.create_table(&schema_b, "right").unwrap();

    {
        let mut left = txn.open_table(&schema_a, "left").unwrap();
        left.insert(&record("left/1", "shared", 1)).unwrap();
    }
    {
        let mut right = txn.open_table(&schema_b, "right").unwrap();
        right.insert(&record("right/1", "shared", 2)).unwrap();
    }

    // the shared tree sees entries from both tables
    let mut left = txn.open_table(&schema_a, "left").unwrap();
    let mut iter = left.seek("by-tag", b"shared").unwrap();
    let group = iter.next().unwrap().unwrap();
    assert_eq!(group.key, SeekKey::Bytes(b"shared"));

    let mut pks: Vec<Vec<u8>> = group
        .records
        .map(|r| r.unwrap().field(0).unwrap().to_vec())
        .collect();
    pks.sort();
    assert_eq!(pks, vec![b"left/1".to_vec(), b"right/1".to_vec()]);
}

#[test]
fn delete_removes_index_entries() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema_with_indexes();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    table.insert(&record("a", "gone", 5)).unwrap();
    table.insert(&record("b", "kept", 5)).unwrap();

    assert!(table.delete_by_key(b"a").unwrap());

    // "a" is out of the shared fixed-key group
    {
        let mut iter = table.seek("by-num", &5u64.to_le_bytes()).unwrap();
        let group = iter.next().unwrap().unwrap();
        let keys: Vec<Vec<u8>> = group
            .records
            .map(|r| r.unwrap().field(0).unwrap().to_vec())
            .collect();
        assert_eq!(keys, vec![b"b".to_vec()]);
    }

    // its name key disappears entirely from the general index
    {
        let mut iter = table.seek("by-name", b"gone").unwrap();
        match iter.next() {
            None => {}
            Some(entry) => {
                assert_eq!(entry.unwrap().key, SeekKey::Bytes(b"kept"));
            }
        }
    }
}

#[test]
fn updated_record_moves_between_index_keys() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema_with_indexes();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    let id = table.insert(&record("doc", "old-name", 100)).unwrap();
    let new_id = table.update(id, &record("doc", "new-name", 200)).unwrap();
    assert_eq!(new_id, id);

    // the stale 100 group is gone: seeking from 100 lands directly on 200
    let mut iter = table.seek("by-num", &100u64.to_le_bytes()).unwrap();
    let group = iter.next().unwrap().unwrap();
    assert_eq!(group.key, SeekKey::Fixed(200));
    let ids: Vec<u64> = group.records.map(|r| r.unwrap().id()).collect();
    assert_eq!(ids, vec![id]);
    assert!(iter.next().is_none());

    let mut iter = table.seek("by-name", b"new-name").unwrap();
    let group = iter.next().unwrap().unwrap();
    assert_eq!(group.key, SeekKey::Bytes(b"new-name"));
}

#[test]
fn seeking_an_unknown_index_fails() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema_with_indexes();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    assert!(table.seek("no-such-index", b"x").is_err());
}
