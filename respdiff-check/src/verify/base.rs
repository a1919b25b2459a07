//! Probe steps and stat plumbing shared by every strategy.

use std::sync::Arc;
use std::thread;

use respdiff_client::StoreClient;
use respdiff_core::{CheckError, ConflictKind, KeyRecord, Stat};

/// Shared state embedded in each verifier.
pub struct VerifierBase {
    stat: Arc<Stat>,
    batch_size: usize,
}

impl VerifierBase {
    pub fn new(stat: Arc<Stat>, batch_size: usize) -> Self {
        Self { stat, batch_size }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn incr_key(&self, record: &KeyRecord) {
        self.stat.incr_key(record);
    }

    pub fn incr_field(&self, record: &KeyRecord, kind: ConflictKind) {
        self.stat.incr_field(record, kind);
    }

    pub fn incr_field_by(&self, record: &KeyRecord, kind: ConflictKind, n: i64) {
        self.stat.incr_field_by(record, kind, n);
    }

    /// Resolve types on the source, then fetch cardinalities from both
    /// sides in parallel. Length probes use each record's (fresh) type
    /// tag; a `WRONGTYPE` race lands as the `TYPE_CHANGED` sentinel.
    pub fn fetch_type_and_len(
        &self,
        records: &mut [KeyRecord],
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        if records.is_empty() {
            return Ok(());
        }

        let types = source.pipe_type(records)?;
        for (record, vt) in records.iter_mut().zip(types) {
            record.value_type = vt;
        }

        let (source_lens, target_lens) = {
            let shared: &[KeyRecord] = records;
            thread::scope(|s| {
                let source_probe = s.spawn(|| source.pipe_len(shared));
                let target_probe = s.spawn(|| target.pipe_len(shared));
                (join_probe(source_probe), join_probe(target_probe))
            })
        };
        let (source_lens, target_lens) = (source_lens?, target_lens?);

        for (record, len) in records.iter_mut().zip(source_lens) {
            record.source.item_count = len;
        }
        for (record, len) in records.iter_mut().zip(target_lens) {
            record.target.item_count = len;
        }
        Ok(())
    }

    /// For every record that looks absent on the target but present on
    /// the source, re-probe the source TTL; if the key has since expired
    /// there, collapse the apparent mismatch by zeroing the source count.
    pub fn recheck_ttl(
        &self,
        records: &mut [KeyRecord],
        source: &mut StoreClient,
    ) -> Result<(), CheckError> {
        let suspect: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.target.item_count == 0 && r.source.item_count > 0)
            .map(|(i, _)| i)
            .collect();
        if suspect.is_empty() {
            return Ok(());
        }

        let probes: Vec<KeyRecord> = suspect
            .iter()
            .map(|&i| KeyRecord::scanned(records[i].key.clone(), records[i].db))
            .collect();
        let expired = source.pipe_ttl(&probes)?;

        for (&i, expired) in suspect.iter().zip(expired) {
            if expired {
                records[i].source.item_count = 0;
            }
        }
        Ok(())
    }
}

/// Join a probe thread, folding a panic into a fatal check error.
pub fn join_probe<T>(
    handle: thread::ScopedJoinHandle<'_, Result<T, respdiff_core::ClientError>>,
) -> Result<T, CheckError> {
    match handle.join() {
        Ok(result) => result.map_err(CheckError::from),
        Err(_) => Err(CheckError::WorkerPanic { worker: "probe" }),
    }
}
