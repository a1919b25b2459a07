//! Key-outline strategy: presence only.
//!
//! Source side is probed for type (seeding a presence marker), target
//! side for bare existence. The only conflict this strategy can emit is
//! `lack_target`.

use std::thread;

use respdiff_client::StoreClient;
use respdiff_core::{CheckError, ConflictKind, KeyRecord};

use super::base::{join_probe, VerifierBase};
use super::Verifier;
use crate::context::ConflictSink;

pub struct KeyOutlineVerifier {
    base: VerifierBase,
}

impl KeyOutlineVerifier {
    pub fn new(base: VerifierBase) -> Self {
        Self { base }
    }

    /// Probe both sides in parallel: `TYPE` on the source, `EXISTS` on
    /// the target. The source count is seeded to 1 as a presence marker
    /// so the lack rule can fire; `recheck_ttl` may zero it again.
    fn fetch_keys(
        &self,
        records: &mut [KeyRecord],
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        let (types, exists) = {
            let shared: &[KeyRecord] = records;
            thread::scope(|s| {
                let source_probe = s.spawn(|| source.pipe_type(shared));
                let target_probe = s.spawn(|| target.pipe_exists(shared));
                (join_probe(source_probe), join_probe(target_probe))
            })
        };
        let (types, exists) = (types?, exists?);

        for (record, vt) in records.iter_mut().zip(types) {
            record.value_type = vt;
            record.source.item_count = 1;
        }
        for (record, present) in records.iter_mut().zip(exists) {
            record.target.item_count = present;
        }
        Ok(())
    }
}

impl Verifier for KeyOutlineVerifier {
    fn verify_batch(
        &self,
        mut batch: Vec<KeyRecord>,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        self.fetch_keys(&mut batch, source, target)?;
        self.base.recheck_ttl(&mut batch, source)?;

        for mut record in batch {
            // type changed between scan and probe: not decidable this round
            if record.source.type_changed() {
                continue;
            }

            if record.target.item_count == 0
                && record.target.item_count != record.source.item_count
            {
                record.conflict = ConflictKind::LackTarget;
                self.base.incr_key(&record);
                sink.send(record)?;
            } else {
                record.conflict = ConflictKind::Equal;
                self.base.incr_key(&record);
            }
        }
        Ok(())
    }
}
