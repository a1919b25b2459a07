//! The unit of work handed from scanner to verifier to writer.

use super::{ConflictKind, ValueType};
use crate::constants::TYPE_CHANGED;

/// Per-endpoint probe result for one key.
///
/// `item_count` is the latest successful cardinality probe. Two overloads:
/// `TYPE_CHANGED` (-1) marks a `WRONGTYPE` reply, and in the key-outline
/// strategy the target side carries bare existence (0 absent / 1 present).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointAttr {
    pub item_count: i64,
}

impl EndpointAttr {
    pub fn new(item_count: i64) -> Self {
        Self { item_count }
    }

    /// The key changed type between the scan and this probe.
    pub fn type_changed(&self) -> bool {
        self.item_count == TYPE_CHANGED
    }
}

/// A single conflicting sub-element of a container key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    pub field: Vec<u8>,
    pub conflict: ConflictKind,
}

impl FieldRecord {
    pub fn new(field: Vec<u8>, conflict: ConflictKind) -> Self {
        Self { field, conflict }
    }
}

/// One key moving through the pipeline.
///
/// Born in the scanner, owned by exactly one verifier, then either dropped
/// (`Equal`), sent to the writer (conflicting), or re-queued into a retry
/// batch inside the same verifier call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub key: Vec<u8>,
    pub db: i32,
    pub value_type: ValueType,
    pub conflict: ConflictKind,
    pub source: EndpointAttr,
    pub target: EndpointAttr,
    pub fields: Vec<FieldRecord>,
}

impl KeyRecord {
    /// A fresh round-1 scan result: nothing probed yet.
    pub fn scanned(key: Vec<u8>, db: i32) -> Self {
        Self {
            key,
            db,
            value_type: ValueType::Unknown,
            conflict: ConflictKind::Unset,
            source: EndpointAttr::default(),
            target: EndpointAttr::default(),
            fields: Vec::new(),
        }
    }

    /// Reset to the fresh-scan state so a refinement round re-runs the
    /// first-round classification (used for lack/type conflicts that may
    /// have been repaired by replication in the meantime).
    pub fn mark_for_redo(&mut self) {
        self.value_type = ValueType::Unknown;
        self.conflict = ConflictKind::Unset;
        self.fields.clear();
    }

    /// Key bytes as lossy UTF-8 for log lines and persisted text columns.
    pub fn key_display(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanned_record_is_unclassified() {
        let rec = KeyRecord::scanned(b"user:1".to_vec(), 0);
        assert_eq!(rec.value_type, ValueType::Unknown);
        assert_eq!(rec.conflict, ConflictKind::Unset);
        assert!(rec.fields.is_empty());
    }

    #[test]
    fn test_mark_for_redo_clears_classification() {
        let mut rec = KeyRecord::scanned(b"k".to_vec(), 2);
        rec.value_type = ValueType::Hash;
        rec.conflict = ConflictKind::LackTarget;
        rec.fields
            .push(FieldRecord::new(b"f".to_vec(), ConflictKind::Value));
        rec.mark_for_redo();
        assert_eq!(rec.value_type, ValueType::Unknown);
        assert_eq!(rec.conflict, ConflictKind::Unset);
        assert!(rec.fields.is_empty());
        assert_eq!(rec.db, 2);
    }

    #[test]
    fn test_type_changed_sentinel() {
        assert!(EndpointAttr::new(-1).type_changed());
        assert!(!EndpointAttr::new(0).type_changed());
    }
}
