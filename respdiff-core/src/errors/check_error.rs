//! Top-level error for the comparison pipeline.

use super::{ClientError, ConfigError, StorageError};

/// Any fatal condition inside the scan → verify → write pipeline.
/// There is deliberately no partial-result mode: the first of these aborts
/// the run.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("scan failed: {message}")]
    Scan { message: String },

    #[error("worker thread panicked: {worker}")]
    WorkerPanic { worker: &'static str },

    /// Shutdown marker raised when another worker already failed; never
    /// stored as the round's cause.
    #[error("round cancelled")]
    Cancelled,
}
