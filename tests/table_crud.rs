//! End-to-end CRUD coverage: placement, primary-key lookups, in-place and
//! relocating updates, and the entry counter.

use stonetable::storage::PAGE_SIZE;
use stonetable::{RecordBuilder, SchemaIndexDef, Store, TableSchema};
use tempfile::tempdir;

fn schema() -> TableSchema {
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
fn insert_read_delete_by_key() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    table.insert(&record("A", "first", 1)).unwrap();

    let view = table.read_by_key(b"A").unwrap().unwrap();
    assert_eq!(view.field(1).unwrap(), b"first");

    assert!(table.delete_by_key(b"A").unwrap());
    assert!(table.read_by_key(b"A").unwrap().is_none());
    assert!(!table.delete_by_key(b"A").unwrap());
}

#[test]
fn entry_count_tracks_inserts_and_deletes() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    for i in 0..20u64 {
        table
            .insert(&record(&format!("k{:04}", i), "n", i))
            .unwrap();
    }
    assert_eq!(table.number_of_entries(), 20);

    for i in 0..5u64 {
        assert!(table.delete_by_key(format!("k{:04}", i).as_bytes()).unwrap());
    }
    assert_eq!(table.number_of_entries(), 15);
}

#[test]
fn small_and_overflow_ids_encode_placement() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    let small_id = table.insert(&record("small", "tiny", 1)).unwrap();
    assert_ne!(small_id % PAGE_SIZE as u64, 0);

    // name large enough to exceed the small-record limit
    let big_name = "x".repeat(3000);
    let big_id = table.insert(&record("big", &big_name, 2)).unwrap();
    assert_eq!(big_id % PAGE_SIZE as u64, 0);

    let view = table.read_by_key(b"big").unwrap().unwrap();
    assert_eq!(view.field(1).unwrap(), big_name.as_bytes());
    assert_eq!(view.id(), big_id);
}

#[test]
fn overflow_record_spans_multiple_pages() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    let payload: String = (0..40_000).map(|i| (b'a' + (i % 26) as u8) as char).collect();
    let id = table.insert(&record("huge", &payload, 3)).unwrap();
    assert_eq!(id % PAGE_SIZE as u64, 0);

    let view = table.read_by_key(b"huge").unwrap().unwrap();
    assert_eq!(view.field(1).unwrap(), payload.as_bytes());
}

#[test]
fn noop_update_keeps_id_and_bytes() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    let builder = record("stable", "same", 9);
    let id = table.insert(&builder).unwrap();

    let id_after = table.update(id, &builder).unwrap();
    assert_eq!(id_after, id);

    let view = table.read_by_key(b"stable").unwrap().unwrap();
    assert_eq!(view.id(), id);
    assert_eq!(view.field(1).unwrap(), b"same");
    assert_eq!(table.number_of_entries(), 1);
}

#[test]
fn growing_update_relocates_and_stays_consistent() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    let id = table.insert(&record("grow", "short", 5)).unwrap();

    // still a small record, but larger than the original reservation
    let bigger = "y".repeat(1500);
    let new_id = table.update(id, &record("grow", &bigger, 5)).unwrap();
    assert_ne!(new_id, id);

    let view = table.read_by_key(b"grow").unwrap().unwrap();
    assert_eq!(view.id(), new_id);
    assert_eq!(view.field(1).unwrap(), bigger.as_bytes());
    assert_eq!(table.number_of_entries(), 1);

    // the secondary index follows the record to its new id
    let mut iter = table.seek("by-num", &5u64.to_le_bytes()).unwrap();
    let result = iter.next().unwrap().unwrap();
    let ids: Vec<u64> = result
        .records
        .map(|r| r.unwrap().id())
        .collect();
    assert_eq!(ids, vec![new_id]);
}

#[test]
fn update_to_overflow_size_switches_placement() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    let id = table.insert(&record("switch", "small", 8)).unwrap();
    assert_ne!(id % PAGE_SIZE as u64, 0);

    let huge = "z".repeat(5000);
    let new_id = table.update(id, &record("switch", &huge, 8)).unwrap();
    assert_eq!(new_id % PAGE_SIZE as u64, 0);

    let view = table.read_by_key(b"switch").unwrap().unwrap();
    assert_eq!(view.field(1).unwrap(), huge.as_bytes());
}

#[test]
fn same_page_count_overflow_update_is_in_place() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    let id = table.insert(&record("of", &"a".repeat(20_000), 4)).unwrap();
    assert_eq!(id % PAGE_SIZE as u64, 0);

    // 17,000 bytes still needs two pages, so the id must not change
    let new_id = table.update(id, &record("of", &"b".repeat(17_000), 4)).unwrap();
    assert_eq!(new_id, id);

    let view = table.read_by_key(b"of").unwrap().unwrap();
    assert_eq!(view.field(1).unwrap().len(), 17_000);
    assert!(view.field(1).unwrap().iter().all(|&b| b == b'b'));
}

#[test]
fn rejected_insert_leaves_entry_count_unchanged() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    // two fields only: the fixed index over field 2 has nothing to extract
    let mut short = RecordBuilder::new();
    short.add_field(b"half").add_field(b"record");
    assert!(table.insert(&short).is_err());
    assert_eq!(table.number_of_entries(), 0);

    table.insert(&record("whole", "record", 1)).unwrap();
    assert_eq!(table.number_of_entries(), 1);
    assert!(table.read_by_key(b"whole").unwrap().is_some());
}

#[test]
fn set_is_an_upsert() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "docs").unwrap();
    let mut table = txn.open_table(&schema, "docs").unwrap();

    table.set(&record("ups", "one", 1)).unwrap();
    assert_eq!(table.number_of_entries(), 1);

    table.set(&record("ups", "two", 2)).unwrap();
    assert_eq!(table.number_of_entries(), 1);

    let view = table.read_by_key(b"ups").unwrap().unwrap();
    assert_eq!(view.field(1).unwrap(), b"two");
}

#[test]
fn records_survive_commit_and_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.stb");
    let schema = schema();

    {
        let mut store = Store::create(&path).unwrap();
        let mut txn = store.begin();
        txn.create_table(&schema, "docs").unwrap();
        let mut table = txn.open_table(&schema, "docs").unwrap();
        for i in 0..100u64 {
            table
                .insert(&record(&format!("key-{:05}", i), "persisted", i))
                .unwrap();
        }
        txn.commit().unwrap();
    }

    let mut store = Store::open(&path).unwrap();
    let mut txn = store.begin();
    let table = txn.open_table(&schema, "docs").unwrap();

    assert_eq!(table.number_of_entries(), 100);
    for i in (0..100u64).step_by(13) {
        let key = format!("key-{:05}", i);
        let view = table.read_by_key(key.as_bytes()).unwrap().unwrap();
        assert_eq!(view.field(0).unwrap(), key.as_bytes());
    }
}
