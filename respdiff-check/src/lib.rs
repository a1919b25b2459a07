//! # respdiff-check
//!
//! The comparison engine: three verifier strategies over a shared probe
//! base, per-type comparators, the round-1 source scanner and round-N
//! store scanner, and the orchestrator that wires scan → verify → write
//! through bounded channels for N refinement rounds.

pub mod context;
pub mod orchestrator;
pub mod scan;
pub mod verify;

pub use context::{ConflictSink, RoundContext};
pub use orchestrator::Orchestrator;
pub use verify::{build_verifier, Verifier};
