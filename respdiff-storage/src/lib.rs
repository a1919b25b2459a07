//! # respdiff-storage
//!
//! SQLite persistence for the comparison pipeline: one database per
//! round, conflict-key and conflict-field tables, batched transactions,
//! and ordered reads that feed the next round's scanner.

pub mod result_db;
pub mod writer;

pub use result_db::ResultDb;
pub use writer::{ConflictWriter, WriterStats};
