//! Value-outline strategy: presence, type, and cardinality.

use respdiff_client::StoreClient;
use respdiff_core::constants::TYPE_CHANGED;
use respdiff_core::{CheckError, ConflictKind, KeyRecord, ValueType};

use super::base::VerifierBase;
use super::Verifier;
use crate::context::ConflictSink;

pub struct ValueOutlineVerifier {
    base: VerifierBase,
}

impl ValueOutlineVerifier {
    pub fn new(base: VerifierBase) -> Self {
        Self { base }
    }
}

impl Verifier for ValueOutlineVerifier {
    fn verify_batch(
        &self,
        mut batch: Vec<KeyRecord>,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError> {
        self.base.fetch_type_and_len(&mut batch, source, target)?;
        self.base.recheck_ttl(&mut batch, source)?;

        for mut record in batch {
            // gone at the source since the scan: nothing to compare
            if record.value_type == ValueType::None {
                record.conflict = ConflictKind::Equal;
                self.base.incr_key(&record);
                continue;
            }

            if record.source.type_changed() {
                continue;
            }

            record.conflict = if record.target.item_count == 0
                && record.target.item_count != record.source.item_count
            {
                ConflictKind::LackTarget
            } else if record.target.item_count == TYPE_CHANGED {
                ConflictKind::Type
            } else if record.source.item_count != record.target.item_count {
                ConflictKind::Value
            } else {
                ConflictKind::Equal
            };

            self.base.incr_key(&record);
            if record.conflict.is_conflict() {
                sink.send(record)?;
            }
        }
        Ok(())
    }
}
