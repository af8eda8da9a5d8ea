//! Section lifecycle under heavy deletion: candidate marking, compaction,
//! page reclamation, and candidate reuse during allocation rotation.

use stonetable::{RecordBuilder, SchemaIndexDef, Store, TableSchema};
use tempfile::tempdir;

fn schema() -> TableSchema {
    TableSchema::new(SchemaIndexDef::new_general("pk", 0, 1, false).unwrap())
        .unwrap()
        .with_index(SchemaIndexDef::new_fixed("by-num", 2))
        .unwrap()
}

fn record(key: &str, payload: &[u8], num: u64) -> RecordBuilder {
    let mut builder = RecordBuilder::new();
    builder
        .add_field(key.as_bytes())
        .add_field(payload)
        .add_field(&num.to_le_bytes());
    builder
}

#[test]
fn scattered_deletes_trigger_compaction_and_keep_survivors_readable() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();

    {
        let mut txn = store.begin();
        txn.create_table(&schema, "bulk").unwrap();
        let mut table = txn.open_table(&schema, "bulk").unwrap();

        let payload = [0x5A_u8; 30];
        for i in 0..10_000u64 {
            table
                .insert(&record(&format!("key-{:06}", i), &payload, i % 7))
                .unwrap();
        }
        assert_eq!(table.number_of_entries(), 10_000);
        txn.commit().unwrap();
    }

    let free_before = store.free_page_count().unwrap();

    {
        let mut txn = store.begin();
        let mut table = txn.open_table(&schema, "bulk").unwrap();

        // every key except each tenth, scattered across all sections
        for i in 0..10_000u64 {
            if i % 10 != 0 {
                let key = format!("key-{:06}", i);
                assert!(table.delete_by_key(key.as_bytes()).unwrap(), "{}", key);
            }
        }
        assert_eq!(table.number_of_entries(), 1_000);
        txn.commit().unwrap();
    }

    // at least one drained section page went back to the freelist
    assert!(store.free_page_count().unwrap() > free_before);

    let mut txn = store.begin();
    let table = txn.open_table(&schema, "bulk").unwrap();
    for i in 0..10_000u64 {
        let key = format!("key-{:06}", i);
        let hit = table.read_by_key(key.as_bytes()).unwrap();
        if i % 10 == 0 {
            let view = hit.unwrap_or_else(|| panic!("{} lost after compaction", key));
            assert_eq!(view.field(0).unwrap(), key.as_bytes());
            assert_eq!(view.field(1).unwrap(), [0x5A_u8; 30]);
        } else {
            assert!(hit.is_none(), "{} should be deleted", key);
        }
    }
}

#[test]
fn compacted_records_stay_in_their_indexes() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "idx").unwrap();
    let mut table = txn.open_table(&schema, "idx").unwrap();

    // two sections' worth of records sharing one index value
    let payload = [1u8; 400];
    for i in 0..80u64 {
        table
            .insert(&record(&format!("r{:04}", i), &payload, 42))
            .unwrap();
    }

    // drain the first section almost completely so it compacts
    for i in 0..38u64 {
        assert!(table.delete_by_key(format!("r{:04}", i).as_bytes()).unwrap());
    }

    let survivors: Vec<u64> = (38..80).collect();
    let mut seen = Vec::new();
    {
        let mut iter = table.seek("by-num", &42u64.to_le_bytes()).unwrap();
        let result = iter.next().unwrap().unwrap();
        for view in result.records {
            let view = view.unwrap();
            let key = view.field(0).unwrap();
            let n: u64 = String::from_utf8_lossy(&key[1..]).parse().unwrap();
            seen.push(n);
        }
        assert!(iter.next().is_none());
    }
    seen.sort_unstable();
    assert_eq!(seen, survivors);
}

#[test]
fn rotation_reuses_candidate_sections_before_growing() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "rot").unwrap();
    let mut table = txn.open_table(&schema, "rot").unwrap();

    // fill several sections
    let payload = [7u8; 900];
    for i in 0..60u64 {
        table
            .insert(&record(&format!("a{:04}", i), &payload, i))
            .unwrap();
    }

    // free just over half of an early (non-active) section: density lands
    // between the compaction and candidate thresholds
    for i in 0..9u64 {
        assert!(table.delete_by_key(format!("a{:04}", i).as_bytes()).unwrap());
    }

    let pages_before = {
        drop(table);
        txn.commit().unwrap();
        store.free_page_count().unwrap()
    };

    // new inserts must fit into the reclaimed space without draining the
    // freelist for brand-new section pages; index values are shared with
    // surviving records so no new id-set trees are allocated either
    let mut txn = store.begin();
    let mut table = txn.open_table(&schema, "rot").unwrap();
    for i in 0..9u64 {
        table
            .insert(&record(&format!("b{:04}", i), &payload, 20 + i))
            .unwrap();
    }
    for i in 0..9u64 {
        let key = format!("b{:04}", i);
        assert!(table.read_by_key(key.as_bytes()).unwrap().is_some());
    }
    drop(table);
    txn.commit().unwrap();

    assert_eq!(store.free_page_count().unwrap(), pages_before);
}

#[test]
fn deleting_everything_reclaims_section_pages() {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("test.stb")).unwrap();
    let schema = schema();
    let mut txn = store.begin();
    txn.create_table(&schema, "all").unwrap();
    let mut table = txn.open_table(&schema, "all").unwrap();

    let payload = [3u8; 200];
    for i in 0..300u64 {
        table
            .insert(&record(&format!("d{:04}", i), &payload, i))
            .unwrap();
    }

    for i in 0..300u64 {
        assert!(table.delete_by_key(format!("d{:04}", i).as_bytes()).unwrap());
    }

    assert_eq!(table.number_of_entries(), 0);
    drop(table);
    txn.commit().unwrap();
    assert!(store.free_page_count().unwrap() > 0);
}
