//! The three comparison strategies behind one trait.

mod base;
pub mod compare;
mod full_value;
mod key_outline;
pub mod stream;
mod value_outline;

use std::sync::Arc;

pub use base::VerifierBase;
pub use full_value::FullValueVerifier;
pub use key_outline::KeyOutlineVerifier;
pub use value_outline::ValueOutlineVerifier;

use respdiff_client::StoreClient;
use respdiff_core::{CheckError, CompareMode, KeyRecord, Stat};

use crate::context::ConflictSink;

/// One comparison strategy. Implementations classify a batch of records,
/// count every classification, and emit conflicting records to the sink.
pub trait Verifier: Send + Sync {
    fn verify_batch(
        &self,
        batch: Vec<KeyRecord>,
        sink: &ConflictSink,
        source: &mut StoreClient,
        target: &mut StoreClient,
    ) -> Result<(), CheckError>;
}

/// Build the strategy selected at launch.
pub fn build_verifier(
    mode: CompareMode,
    stat: Arc<Stat>,
    batch_size: usize,
    big_key_threshold: i64,
) -> Arc<dyn Verifier> {
    let base = VerifierBase::new(stat, batch_size);
    match mode {
        CompareMode::KeyOutline => Arc::new(KeyOutlineVerifier::new(base)),
        CompareMode::ValueOutline => Arc::new(ValueOutlineVerifier::new(base)),
        CompareMode::Full => Arc::new(FullValueVerifier::new(base, big_key_threshold, false)),
        CompareMode::FullIgnoreBig => {
            Arc::new(FullValueVerifier::new(base, big_key_threshold, true))
        }
    }
}
