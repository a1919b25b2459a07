//! Full-value strategy: byte-for-byte comparison with bounded memory.
//!
//! Small containers and strings ride a pipelined fetch-all; big
//! containers are paged (`*SCAN` cursors, windowed `LRANGE`); streams get
//! the three-phase walk. Refinement rounds narrow hash/set/zset keys to
//! the sub-elements recorded in the previous round, re-run strings and
//! lists whole (indices shift under pushes and pops), and re-enter
//! lack/type conflicts through the first-round path in case replication
//! has caught up.

use respdiff_client::{Command, PipeSlot, Reply, StoreClient};
use respdiff_core::constants::{LIST_PAGE_CAP, TYPE_CHANGED};
use respdiff_core::{CheckError, ConflictKind, FieldRecord, KeyRecord, ValueType};

use super::base::VerifierBase;
use super::compare::{
    compare_list, compare_map, compare_string, list_from_reply, map_from_members, map_from_pairs,
    ContainerMap, MapDiff,
};
use super::stream::compare_stream;
use super::Verifier;
use crate::context::ConflictSink;

pub struct FullValueVerifier {
    base: VerifierBase,
    big_key_threshold: i64,
    /// Compare big containers by cardinality only.
    ignore_big: bool,
}

impl FullValueVerifier {
    pub fn new(base: VerifierBase, big_key_threshold: i64, ignore_big: bool) -> Self {
        Self {
            base,
            big_key_threshold,
            ignore_big,
        }
    }

    fn is_big(&self, record: &KeyRecord) -> bool {
        record.value_type != ValueType::String
            && (record.source.item_count > self.big_key_threshold
                || record.target.item_count > self.big_key_threshold)
    }

    /// Cardinality-only verdict for big containers under ignore-big.
    fn settle_by_len(&self, mut record: KeyRecord, sink: &ConflictSink) -> Result<(), CheckError> {
        record.fields.clear();
        record.conflict = if record.source.item_count != record.target.item_count {
            ConflictKind::Value
        } else {
            ConflictKind::Equal
        };
        self.base.incr_key(&record);
        if record.conflict.is_conflict() {
            sink.send(record)?;
        }
        Ok(())
    }

    /// Fold a container diff into the record's verdict.
    fn settle_map_diff(
        &self,
        mut record: KeyRecord,
        diff: MapDiff,
        sink: &ConflictSink,
    ) -> Result<(), CheckError> {
        for field in &diff.fields {
            self.base.incr_field(&record, field.conflict);
        }
        self.base
            .incr_field_by(&record, ConflictKind::Equal, diff.equal_fields as i64);

        if diff.fields.is_empty() {
            record.fields.clear();
            record.conflict = ConflictKind::Equal;
            self.base.incr_key(&record);
        } else {
            record.fields = diff.fields;
            record.conflict = ConflictKind::Value;
            self.base.incr_key(&record);
            sink.send(record)?;
        }
        Ok(())
    }

    /// Big hash/set/zset: pull both sides through their scan cursor and
    /// run the map comparator.
    fn check_big_container(
        &self,
        record: KeyRecord,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        let source_value = source.scan_container(&record, self.base.batch_size())?;
        let target_value = target.scan_container(&record, self.base.batch_size())?;
        self.settle_map_diff(record, compare_map(source_value, target_value), sink)
    }

    /// Big list: slide an `LRANGE` window across both sides, stop at the
    /// first window containing any difference and report only the first
    /// differing index; deeper positions shift under concurrent pushes
    /// and pops before they could be re-verified.
    fn check_big_list(
        &self,
        mut record: KeyRecord,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        let window = (self.base.batch_size() * 10).min(LIST_PAGE_CAP) as i64;
        let mut start: i64 = 0;
        let mut first_conflict: Option<FieldRecord> = None;

        loop {
            let page = |key: &[u8]| {
                Command::new("LRANGE")
                    .arg(key.to_vec())
                    .arg_int(start)
                    .arg_int(start + window - 1)
            };
            let source_page = list_from_reply(source.do_command(&page(&record.key))?);
            let target_page = list_from_reply(target.do_command(&page(&record.key))?);

            let overlap = source_page.len().min(target_page.len());
            for i in 0..overlap {
                if source_page[i] != target_page[i] {
                    // only the first differing index is recorded or counted
                    if first_conflict.is_none() {
                        first_conflict = Some(FieldRecord::new(
                            (start + i as i64).to_string().into_bytes(),
                            ConflictKind::Value,
                        ));
                        self.base.incr_field(&record, ConflictKind::Value);
                    }
                } else {
                    self.base.incr_field(&record, ConflictKind::Equal);
                }
            }

            if first_conflict.is_some() {
                break;
            }
            // one side exhausted
            if (overlap as i64) < window {
                break;
            }
            start += window;
        }

        match first_conflict {
            Some(field) => {
                record.fields = vec![field];
                record.conflict = ConflictKind::Value;
                self.base.incr_key(&record);
                sink.send(record)?;
            }
            None => {
                record.fields.clear();
                record.conflict = ConflictKind::Equal;
                self.base.incr_key(&record);
            }
        }
        Ok(())
    }

    fn check_stream(
        &self,
        mut record: KeyRecord,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        let differs = compare_stream(&record, source, target)?;
        record.fields.clear();
        record.conflict = if differs {
            ConflictKind::Value
        } else {
            ConflictKind::Equal
        };
        self.base.incr_key(&record);
        if record.conflict.is_conflict() {
            sink.send(record)?;
        }
        Ok(())
    }

    /// Batched whole-value fetch for strings and small containers.
    fn check_fetch_all(
        &self,
        records: Vec<KeyRecord>,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        let source_slots = source.pipe_value(&records)?;
        let target_slots = target.pipe_value(&records)?;

        for (mut record, (source_slot, target_slot)) in records
            .into_iter()
            .zip(source_slots.into_iter().zip(target_slots))
        {
            let (PipeSlot::Reply(source_reply), PipeSlot::Reply(target_reply)) =
                (source_slot, target_slot)
            else {
                // type changed mid-flight on either side
                continue;
            };

            match record.value_type {
                ValueType::String => {
                    let source_value = source_reply.into_bytes("GET")?;
                    let target_value = target_reply.into_bytes("GET")?;
                    record.conflict = compare_string(&source_value, &target_value);
                    self.base.incr_key(&record);
                    if record.conflict.is_conflict() {
                        sink.send(record)?;
                    }
                }
                ValueType::Hash | ValueType::Zset => {
                    let diff =
                        compare_map(map_from_pairs(source_reply), map_from_pairs(target_reply));
                    self.settle_map_diff(record, diff, sink)?;
                }
                ValueType::Set => {
                    let diff =
                        compare_map(map_from_members(source_reply), map_from_members(target_reply));
                    self.settle_map_diff(record, diff, sink)?;
                }
                ValueType::List => {
                    let source_value = list_from_reply(source_reply);
                    let target_value = list_from_reply(target_reply);
                    match compare_list(&source_value, &target_value) {
                        Some(field) => {
                            self.base.incr_field(&record, field.conflict);
                            record.fields = vec![field];
                            record.conflict = ConflictKind::Value;
                            self.base.incr_key(&record);
                            sink.send(record)?;
                        }
                        None => {
                            record.fields.clear();
                            record.conflict = ConflictKind::Equal;
                            self.base.incr_key(&record);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Round-2+ hash narrowing: probe only the previously conflicting
    /// fields with batched `HMGET` on both sides.
    fn check_partial_hash(
        &self,
        mut record: KeyRecord,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        let fields: Vec<Vec<u8>> = record.fields.iter().map(|f| f.field.clone()).collect();
        let mut source_value = ContainerMap::default();
        let mut target_value = ContainerMap::default();

        for chunk in fields.chunks(self.base.batch_size().max(1)) {
            let mut cmd = Command::new("HMGET").arg(record.key.clone());
            for field in chunk {
                cmd = cmd.arg(field.clone());
            }
            let source_page = source.do_command(&cmd)?.into_array("HMGET")?;
            let target_page = target.do_command(&cmd)?.into_array("HMGET")?;

            for ((field, source_reply), target_reply) in
                chunk.iter().zip(source_page).zip(target_page)
            {
                if let Reply::Bulk(v) = source_reply {
                    source_value.insert(field.clone(), v);
                }
                if let Reply::Bulk(v) = target_reply {
                    target_value.insert(field.clone(), v);
                }
            }
        }

        record.fields.clear();
        self.settle_map_diff(record, compare_map(source_value, target_value), sink)
    }

    /// Round-2+ set narrowing: membership probes for the previously
    /// conflicting members.
    fn check_partial_set(
        &self,
        mut record: KeyRecord,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        let members: Vec<Vec<u8>> = record.fields.iter().map(|f| f.field.clone()).collect();
        let mut source_value = ContainerMap::default();
        let mut target_value = ContainerMap::default();

        for chunk in members.chunks(self.base.batch_size().max(1)) {
            let source_hits = source.pipe_sismember(&record.key, chunk)?;
            let target_hits = target.pipe_sismember(&record.key, chunk)?;
            for ((member, source_hit), target_hit) in
                chunk.iter().zip(source_hits).zip(target_hits)
            {
                if source_hit != 0 {
                    source_value.insert(member.clone(), Vec::new());
                }
                if target_hit != 0 {
                    target_value.insert(member.clone(), Vec::new());
                }
            }
        }

        record.fields.clear();
        self.settle_map_diff(record, compare_map(source_value, target_value), sink)
    }

    /// Round-2+ zset narrowing: score probes for the previously
    /// conflicting members.
    fn check_partial_zset(
        &self,
        mut record: KeyRecord,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        let members: Vec<Vec<u8>> = record.fields.iter().map(|f| f.field.clone()).collect();
        let mut source_value = ContainerMap::default();
        let mut target_value = ContainerMap::default();

        for chunk in members.chunks(self.base.batch_size().max(1)) {
            let source_scores = source.pipe_zscore(&record.key, chunk)?;
            let target_scores = target.pipe_zscore(&record.key, chunk)?;
            for ((member, source_score), target_score) in
                chunk.iter().zip(source_scores).zip(target_scores)
            {
                if let Some(score) = source_score {
                    source_value.insert(member.clone(), score);
                }
                if let Some(score) = target_score {
                    target_value.insert(member.clone(), score);
                }
            }
        }

        record.fields.clear();
        self.settle_map_diff(record, compare_map(source_value, target_value), sink)
    }
}

impl Verifier for FullValueVerifier {
    fn verify_batch(
        &self,
        batch: Vec<KeyRecord>,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        // Records entering first-round classification (fresh scans and
        // redo markers) need type and length resolved; refinement records
        // carry both from the previous round.
        let (mut unresolved, known): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|r| r.value_type == ValueType::Unknown);
        self.base.fetch_type_and_len(&mut unresolved, source, target)?;
        self.base.recheck_ttl(&mut unresolved, source)?;

        let mut fetch_all = Vec::new();
        let mut retry = Vec::new();

        for mut record in unresolved.into_iter().chain(known) {
            if record.conflict == ConflictKind::Unset {
                // First-round classification.
                if record.value_type == ValueType::None {
                    record.conflict = ConflictKind::Equal;
                    self.base.incr_key(&record);
                    continue;
                }
                if record.source.type_changed() {
                    continue;
                }
                if record.target.item_count == 0
                    && record.target.item_count != record.source.item_count
                {
                    record.conflict = ConflictKind::LackTarget;
                    self.base.incr_key(&record);
                    sink.send(record)?;
                    continue;
                }
                if record.target.item_count == TYPE_CHANGED {
                    record.conflict = ConflictKind::Type;
                    self.base.incr_key(&record);
                    sink.send(record)?;
                    continue;
                }
                if record.value_type == ValueType::String
                    && record.source.item_count != record.target.item_count
                {
                    record.conflict = ConflictKind::Value;
                    self.base.incr_key(&record);
                    sink.send(record)?;
                    continue;
                }

                if self.is_big(&record) {
                    if self.ignore_big {
                        self.settle_by_len(record, sink)?;
                    } else {
                        match record.value_type {
                            ValueType::Hash | ValueType::Set | ValueType::Zset => {
                                self.check_big_container(record, sink, source, target)?;
                            }
                            ValueType::List => self.check_big_list(record, sink, source, target)?,
                            ValueType::Stream => self.check_stream(record, sink, source, target)?,
                            _ => {}
                        }
                    }
                    continue;
                }

                if record.value_type == ValueType::Stream {
                    self.check_stream(record, sink, source, target)?;
                    continue;
                }

                fetch_all.push(record);
            } else {
                // Refinement of a previously classified record.
                match record.conflict {
                    ConflictKind::LackSource | ConflictKind::LackTarget | ConflictKind::Type => {
                        // likely repaired since last round: re-enter the
                        // first-round path with fresh probes
                        record.mark_for_redo();
                        retry.push(record);
                    }
                    ConflictKind::Value => {
                        if self.is_big(&record) && self.ignore_big {
                            self.settle_by_len(record, sink)?;
                            continue;
                        }
                        match record.value_type {
                            ValueType::String => fetch_all.push(record),
                            ValueType::List => {
                                if self.is_big(&record) {
                                    self.check_big_list(record, sink, source, target)?;
                                } else {
                                    fetch_all.push(record);
                                }
                            }
                            ValueType::Hash => {
                                self.check_partial_hash(record, sink, source, target)?;
                            }
                            ValueType::Set => self.check_partial_set(record, sink, source, target)?,
                            ValueType::Zset => {
                                self.check_partial_zset(record, sink, source, target)?;
                            }
                            ValueType::Stream => self.check_stream(record, sink, source, target)?,
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }
        }

        if !fetch_all.is_empty() {
            self.check_fetch_all(fetch_all, sink, source, target)?;
        }
        if !retry.is_empty() {
            self.verify_batch(retry, sink, source, target)?;
        }
        Ok(())
    }
}
