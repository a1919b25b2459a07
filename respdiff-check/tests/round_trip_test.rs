//! Whole-pipeline tests: orchestrator over mock stores, results read back
//! from the round databases.

use tempfile::TempDir;

use respdiff_check::Orchestrator;
use respdiff_client::testing::MiniStore;
use respdiff_core::{CheckConfig, CompareMode, EndpointConfig, EndpointKind, FxHashMap};
use respdiff_storage::ResultDb;

fn config_for(source: &MiniStore, target: &MiniStore, dir: &TempDir, rounds: u32) -> CheckConfig {
    CheckConfig {
        source: EndpointConfig::new(vec![source.addr().to_string()], EndpointKind::Single),
        target: EndpointConfig::new(vec![target.addr().to_string()], EndpointKind::Single),
        mode: CompareMode::Full,
        result_db: dir.path().join("result.db"),
        rounds,
        interval_secs: 0,
        batch_size: 256,
        parallel: 2,
        qps: 100_000,
        big_key_threshold: 0,
        filters: String::new(),
        result_file: Some(dir.path().join("result.txt")),
        metric_file: None,
    }
}

fn seed_scenarios() -> (MiniStore, MiniStore) {
    let source = MiniStore::start(FxHashMap::default());
    let target = MiniStore::start(FxHashMap::default());

    source.set(b"SameValue", b"val");
    target.set(b"SameValue", b"val");
    source.set(b"LackKeyA", b"valA");
    source.set(b"DiffLength", b"valA");
    target.set(b"DiffLength", b"valAA");
    source.set(b"SameLength", b"valA");
    target.set(b"SameLength", b"valB");
    source.sadd(b"TypeError", &[b"a", b"b"]);
    target.hset(b"TypeError", &[(b"a", b"b")]);
    source.hset(b"HashDiffField", &[(b"a", b"b")]);
    target.hset(b"HashDiffField", &[(b"b", b"d")]);

    (source, target)
}

#[test]
fn three_rounds_over_frozen_endpoints() {
    let (source, target) = seed_scenarios();
    let dir = TempDir::new().unwrap();
    let config = config_for(&source, &target, &dir, 3);
    let db_file = config.result_db.clone();

    Orchestrator::new(config).unwrap().run().unwrap();

    // frozen endpoints: every round reports the same five conflict keys
    for round in 1..=3 {
        let db = ResultDb::open(&db_file, round, 3).unwrap();
        assert_eq!(db.count_keys().unwrap(), 5, "round {round}");
    }

    let last = ResultDb::open(&db_file, 3, 3).unwrap();
    let (records, _) = last.read_prior_batch(0, 0, 100).unwrap();
    let find = |key: &[u8]| records.iter().find(|r| r.key == key).unwrap();

    assert_eq!(find(b"LackKeyA").conflict.name(), "lack_target");
    assert_eq!(find(b"DiffLength").conflict.name(), "value");
    assert_eq!(find(b"SameLength").conflict.name(), "value");
    assert_eq!(find(b"TypeError").conflict.name(), "type");

    let hash = find(b"HashDiffField");
    assert_eq!(hash.conflict.name(), "value");
    assert_eq!(hash.fields.len(), 2);

    // equal keys never reach any table
    assert!(records.iter().all(|r| r.key != b"SameValue"));

    // 4 scalar conflicts + 2 field rows of the hash key
    assert_eq!(last.count_final().unwrap(), 6);
    let flat = std::fs::read_to_string(dir.path().join("result.txt")).unwrap();
    assert_eq!(flat.lines().count(), 6);
}

#[test]
fn identical_endpoints_produce_empty_report() {
    let (source, _target) = seed_scenarios();
    let dir = TempDir::new().unwrap();
    // the store compared against itself
    let config = config_for(&source, &source, &dir, 2);
    let db_file = config.result_db.clone();

    Orchestrator::new(config).unwrap().run().unwrap();

    for round in 1..=2 {
        let db = ResultDb::open(&db_file, round, 2).unwrap();
        assert_eq!(db.count_keys().unwrap(), 0, "round {round}");
    }
}

#[test]
fn filter_keeps_keys_out_of_every_table() {
    let (source, target) = seed_scenarios();
    let dir = TempDir::new().unwrap();
    let mut config = config_for(&source, &target, &dir, 2);
    // only keys starting with "Lack" survive the filter
    config.filters = "Lack*".to_string();
    let db_file = config.result_db.clone();

    Orchestrator::new(config).unwrap().run().unwrap();

    let last = ResultDb::open(&db_file, 2, 2).unwrap();
    let (records, _) = last.read_prior_batch(0, 0, 100).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, b"LackKeyA");
}

#[test]
fn repaired_target_converges_to_clean_final_round() {
    let source = MiniStore::start(FxHashMap::default());
    let target = MiniStore::start(FxHashMap::default());
    source.set(b"late", b"v");

    let dir = TempDir::new().unwrap();
    let mut config = config_for(&source, &target, &dir, 2);
    config.interval_secs = 2;
    let db_file = config.result_db.clone();

    // the "replica" catches up during the between-round interval
    std::thread::scope(|s| {
        s.spawn(|| {
            std::thread::sleep(std::time::Duration::from_millis(700));
            target.set(b"late", b"v");
        });
        Orchestrator::new(config).unwrap().run().unwrap();
    });

    let last = ResultDb::open(&db_file, 2, 2).unwrap();
    assert_eq!(last.count_keys().unwrap(), 0);
    assert_eq!(last.count_final().unwrap(), 0);
}
