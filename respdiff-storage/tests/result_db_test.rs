//! Round-trip tests: writer → tables → next-round reads.

use crossbeam_channel::bounded;
use tempfile::TempDir;

use respdiff_core::{ConflictKind, FieldRecord, KeyRecord, ValueType};
use respdiff_storage::{ConflictWriter, ResultDb};

fn conflict_record(key: &[u8], kind: ConflictKind, vt: ValueType) -> KeyRecord {
    let mut rec = KeyRecord::scanned(key.to_vec(), 0);
    rec.value_type = vt;
    rec.conflict = kind;
    rec.source.item_count = 3;
    rec.target.item_count = 2;
    rec
}

fn drain_records(db: ResultDb, final_round: bool, records: Vec<KeyRecord>) -> respdiff_storage::WriterStats {
    let writer = ConflictWriter::new(db, "a".into(), "b".into(), final_round, None).unwrap();
    let (tx, rx) = bounded(16);
    for rec in records {
        tx.send(rec).unwrap();
    }
    drop(tx);
    writer.drain(rx).unwrap()
}

#[test]
fn writer_persists_keys_and_fields() {
    let dir = TempDir::new().unwrap();
    let db_file = dir.path().join("result.db");

    let db = ResultDb::create(&db_file, 1, 3).unwrap();
    let mut hash_rec = conflict_record(b"HashDiffField", ConflictKind::Value, ValueType::Hash);
    hash_rec
        .fields
        .push(FieldRecord::new(b"a".to_vec(), ConflictKind::LackTarget));
    hash_rec
        .fields
        .push(FieldRecord::new(b"b".to_vec(), ConflictKind::LackSource));
    let string_rec = conflict_record(b"LackKeyA", ConflictKind::LackTarget, ValueType::String);

    let stats = drain_records(db, false, vec![hash_rec.clone(), string_rec.clone()]);
    assert_eq!(stats.keys, 2);
    assert_eq!(stats.fields, 2);

    // read back the way round 2's scanner would
    let db = ResultDb::open(&db_file, 1, 3).unwrap();
    let (records, last_id) = db.read_prior_batch(0, 0, 100).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(last_id, 2);

    let hash_back = records.iter().find(|r| r.key == b"HashDiffField").unwrap();
    assert_eq!(hash_back.value_type, ValueType::Hash);
    assert_eq!(hash_back.conflict, ConflictKind::Value);
    assert_eq!(hash_back.source.item_count, 3);
    assert_eq!(hash_back.fields.len(), 2);
    assert_eq!(hash_back.fields[0].field, b"a");
    assert_eq!(hash_back.fields[0].conflict, ConflictKind::LackTarget);

    let string_back = records.iter().find(|r| r.key == b"LackKeyA").unwrap();
    assert!(string_back.fields.is_empty());

    // pagination: nothing after the last id
    let (rest, id) = db.read_prior_batch(0, last_id, 100).unwrap();
    assert!(rest.is_empty());
    assert_eq!(id, last_id);
}

#[test]
fn final_round_writes_canonical_tables_and_final_result() {
    let dir = TempDir::new().unwrap();
    let db_file = dir.path().join("result.db");

    let db = ResultDb::create(&db_file, 3, 3).unwrap();
    let mut hash_rec = conflict_record(b"h", ConflictKind::Value, ValueType::Hash);
    hash_rec
        .fields
        .push(FieldRecord::new(b"f1".to_vec(), ConflictKind::Value));
    hash_rec
        .fields
        .push(FieldRecord::new(b"f2".to_vec(), ConflictKind::Value));
    let scalar = conflict_record(b"s", ConflictKind::Type, ValueType::String);

    drain_records(db, true, vec![hash_rec, scalar]);

    let db = ResultDb::open(&db_file, 3, 3).unwrap();
    assert_eq!(db.count_keys().unwrap(), 2);
    // one FINAL_RESULT row per field, one for the scalar key
    assert_eq!(db.count_final().unwrap(), 3);
}

#[test]
fn create_removes_stale_database() {
    let dir = TempDir::new().unwrap();
    let db_file = dir.path().join("result.db");

    let db = ResultDb::create(&db_file, 1, 1).unwrap();
    drain_records(db, true, vec![conflict_record(b"x", ConflictKind::Value, ValueType::String)]);

    // re-creating the same round starts from an empty table
    let db = ResultDb::create(&db_file, 1, 1).unwrap();
    assert_eq!(db.count_keys().unwrap(), 0);
}

#[test]
fn corrupt_rows_are_fatal() {
    let dir = TempDir::new().unwrap();
    let db_file = dir.path().join("result.db");

    let db = ResultDb::create(&db_file, 1, 3).unwrap();
    let mut bad = conflict_record(b"k", ConflictKind::Value, ValueType::String);
    bad.conflict = ConflictKind::Unset;
    // the writer never receives unset records in production; force one in
    // to prove the reader rejects it
    db.begin().unwrap();
    db.insert_key(&bad).unwrap();
    db.commit().unwrap();

    let db = ResultDb::open(&db_file, 1, 3).unwrap();
    assert!(db.read_prior_batch(0, 0, 10).is_err());
}

#[test]
fn result_file_rows_per_conflict() {
    let dir = TempDir::new().unwrap();
    let db_file = dir.path().join("result.db");
    let result_file = dir.path().join("result.txt");

    let db = ResultDb::create(&db_file, 1, 1).unwrap();
    let writer = ConflictWriter::new(
        db,
        "src".into(),
        "tgt".into(),
        true,
        Some(result_file.as_path()),
    )
    .unwrap();

    let mut hash_rec = conflict_record(b"h", ConflictKind::Value, ValueType::Hash);
    hash_rec
        .fields
        .push(FieldRecord::new(b"f".to_vec(), ConflictKind::LackTarget));

    let (tx, rx) = bounded(4);
    tx.send(hash_rec).unwrap();
    tx.send(conflict_record(b"s", ConflictKind::LackTarget, ValueType::String))
        .unwrap();
    drop(tx);
    writer.drain(rx).unwrap();

    let content = std::fs::read_to_string(&result_file).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "0\tlack_target\th\tf");
    assert_eq!(lines[1], "0\tlack_target\ts\t");
}
