//! The conflict model: value types, conflict kinds, and the per-key record
//! that flows through the scan → verify → write pipeline.

pub mod collections;
mod conflict;
mod record;
mod value_type;

pub use conflict::ConflictKind;
pub use record::{EndpointAttr, FieldRecord, KeyRecord};
pub use value_type::ValueType;
