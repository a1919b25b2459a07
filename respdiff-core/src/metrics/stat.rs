//! The per-run stat matrices: one scan counter plus two 2-D counter grids
//! indexed by (value type, conflict kind), one for keys and one for fields.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::counter::{CounterSnapshot, SpeedCounter};
use crate::constants::STAT_ROLL_SECS;
use crate::types::{ConflictKind, KeyRecord, ValueType};

type Matrix = [[SpeedCounter; ConflictKind::COUNT]; ValueType::COUNT];

fn new_matrix() -> Matrix {
    std::array::from_fn(|_| std::array::from_fn(|_| SpeedCounter::new()))
}

/// Shared mutable state of a comparison run. All counters are atomic; the
/// struct is placed behind an `Arc` and incremented from every worker.
pub struct Stat {
    pub scan: SpeedCounter,
    conflict_key: Matrix,
    conflict_field: Matrix,
    total_conflict_keys: AtomicI64,
    total_conflict_fields: AtomicI64,
}

impl Default for Stat {
    fn default() -> Self {
        Self::new()
    }
}

impl Stat {
    pub fn new() -> Self {
        Self {
            scan: SpeedCounter::new(),
            conflict_key: new_matrix(),
            conflict_field: new_matrix(),
            total_conflict_keys: AtomicI64::new(0),
            total_conflict_fields: AtomicI64::new(0),
        }
    }

    /// Count one classified key.
    pub fn incr_key(&self, record: &KeyRecord) {
        self.conflict_key[record.value_type.index()][record.conflict.index()].inc(1);
    }

    /// Count one classified field of the given key.
    pub fn incr_field(&self, record: &KeyRecord, kind: ConflictKind) {
        self.conflict_field[record.value_type.index()][kind.index()].inc(1);
    }

    /// Count `n` classified fields of the given key at once.
    pub fn incr_field_by(&self, record: &KeyRecord, kind: ConflictKind, n: i64) {
        if n != 0 {
            self.conflict_field[record.value_type.index()][kind.index()].inc(n);
        }
    }

    pub fn key_counter(&self, vt: ValueType, kind: ConflictKind) -> &SpeedCounter {
        &self.conflict_key[vt.index()][kind.index()]
    }

    pub fn field_counter(&self, vt: ValueType, kind: ConflictKind) -> &SpeedCounter {
        &self.conflict_field[vt.index()][kind.index()]
    }

    /// Rotate every counter on the stat-roll period.
    pub fn rotate(&self) {
        let period = STAT_ROLL_SECS as i64;
        self.scan.rotate(period);
        for row in &self.conflict_key {
            for cell in row {
                cell.rotate(period);
            }
        }
        for row in &self.conflict_field {
            for cell in row {
                cell.rotate(period);
            }
        }
    }

    /// Zero every counter. With `accumulate`, first fold each matrix's
    /// conflicting cells into the cross-round grand totals so rounds do not
    /// double-count each other.
    pub fn reset(&self, accumulate: bool) {
        if accumulate {
            let mut keys = 0;
            let mut fields = 0;
            for vt in ValueType::ALL {
                for kind in ConflictKind::ALL {
                    if !kind.is_conflict() {
                        continue;
                    }
                    keys += self.key_counter(vt, kind).total();
                    fields += self.field_counter(vt, kind).total();
                }
            }
            self.total_conflict_keys.fetch_add(keys, Ordering::Relaxed);
            self.total_conflict_fields
                .fetch_add(fields, Ordering::Relaxed);
        }

        self.scan.reset();
        for row in &self.conflict_key {
            for cell in row {
                cell.reset();
            }
        }
        for row in &self.conflict_field {
            for cell in row {
                cell.reset();
            }
        }
    }

    pub fn total_conflict_keys(&self) -> i64 {
        self.total_conflict_keys.load(Ordering::Relaxed)
    }

    pub fn total_conflict_fields(&self) -> i64 {
        self.total_conflict_fields.load(Ordering::Relaxed)
    }

    /// Sum of conflicting key cells in the current (not yet accumulated)
    /// matrices.
    pub fn current_key_conflicts(&self) -> i64 {
        let mut sum = 0;
        for vt in ValueType::ALL {
            for kind in ConflictKind::ALL {
                if kind.is_conflict() {
                    sum += self.key_counter(vt, kind).total();
                }
            }
        }
        sum
    }

    pub fn current_field_conflicts(&self) -> i64 {
        let mut sum = 0;
        for vt in ValueType::ALL {
            for kind in ConflictKind::ALL {
                if kind.is_conflict() {
                    sum += self.field_counter(vt, kind).total();
                }
            }
        }
        sum
    }

    /// Build the serialisable snapshot emitted on every rotation.
    pub fn snapshot(&self, round: u32, db: i32, db_keys: i64, finished: bool) -> StatSnapshot {
        let mut key_stat: BTreeMap<String, BTreeMap<String, CounterSnapshot>> = BTreeMap::new();
        let mut field_stat: BTreeMap<String, BTreeMap<String, CounterSnapshot>> = BTreeMap::new();

        for vt in ValueType::ALL {
            for kind in ConflictKind::ALL {
                if kind == ConflictKind::Unset {
                    continue;
                }
                let key_cell = self.key_counter(vt, kind);
                if key_cell.total() != 0 {
                    key_stat
                        .entry(vt.name().to_string())
                        .or_default()
                        .insert(kind.name().to_string(), key_cell.snapshot());
                }
                let field_cell = self.field_counter(vt, kind);
                if field_cell.total() != 0 {
                    field_stat
                        .entry(vt.name().to_string())
                        .or_default()
                        .insert(kind.name().to_string(), field_cell.snapshot());
                }
            }
        }

        StatSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            round,
            db,
            db_keys,
            finished,
            key_scan: self.scan.snapshot(),
            key_stat,
            field_stat,
            total_conflict_keys: self.total_conflict_keys(),
            total_conflict_fields: self.total_conflict_fields(),
        }
    }
}

/// One rotation's worth of stats, serialised as a single JSON document per
/// line when a metric file is configured.
#[derive(Debug, Serialize)]
pub struct StatSnapshot {
    pub timestamp: u64,
    pub round: u32,
    pub db: i32,
    pub db_keys: i64,
    pub finished: bool,
    pub key_scan: CounterSnapshot,
    pub key_stat: BTreeMap<String, BTreeMap<String, CounterSnapshot>>,
    pub field_stat: BTreeMap<String, BTreeMap<String, CounterSnapshot>>,
    pub total_conflict_keys: i64,
    pub total_conflict_fields: i64,
}

impl StatSnapshot {
    /// One-line JSON form for the metric file.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_record(kind: ConflictKind) -> KeyRecord {
        let mut rec = KeyRecord::scanned(b"k".to_vec(), 0);
        rec.value_type = ValueType::Hash;
        rec.conflict = kind;
        rec
    }

    #[test]
    fn test_incr_routes_to_matrix_cell() {
        let stat = Stat::new();
        let rec = hash_record(ConflictKind::Value);
        stat.incr_key(&rec);
        stat.incr_key(&rec);
        stat.incr_field(&rec, ConflictKind::LackSource);

        assert_eq!(stat.key_counter(ValueType::Hash, ConflictKind::Value).total(), 2);
        assert_eq!(
            stat.field_counter(ValueType::Hash, ConflictKind::LackSource).total(),
            1
        );
        assert_eq!(stat.key_counter(ValueType::Set, ConflictKind::Value).total(), 0);
    }

    #[test]
    fn test_reset_with_accumulate_folds_conflicts_only() {
        let stat = Stat::new();
        stat.incr_key(&hash_record(ConflictKind::Value));
        stat.incr_key(&hash_record(ConflictKind::Equal));
        stat.incr_field(&hash_record(ConflictKind::Value), ConflictKind::LackTarget);

        stat.reset(true);
        assert_eq!(stat.total_conflict_keys(), 1);
        assert_eq!(stat.total_conflict_fields(), 1);
        assert_eq!(stat.key_counter(ValueType::Hash, ConflictKind::Value).total(), 0);

        // plain reset does not accumulate
        stat.incr_key(&hash_record(ConflictKind::Type));
        stat.reset(false);
        assert_eq!(stat.total_conflict_keys(), 1);
    }

    #[test]
    fn test_snapshot_skips_zero_cells() {
        let stat = Stat::new();
        stat.scan.inc(7);
        stat.incr_key(&hash_record(ConflictKind::Value));

        let snap = stat.snapshot(1, 0, 100, false);
        assert_eq!(snap.key_scan.total, 7);
        assert_eq!(snap.key_stat.len(), 1);
        assert!(snap.key_stat["hash"].contains_key("value"));
        assert!(snap.field_stat.is_empty());
    }
}
