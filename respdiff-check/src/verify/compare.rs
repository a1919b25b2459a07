//! Per-type comparators and reply-shaping helpers.

use respdiff_core::{ConflictKind, FieldRecord, FxHashMap};

use respdiff_client::Reply;

/// The in-memory shape every container comparison reduces to: field (or
/// member) bytes mapped to value (or score) bytes, empty for members.
pub type ContainerMap = FxHashMap<Vec<u8>, Vec<u8>>;

/// `[field, value, field, value, …]` pair stream → map (hash, zset
/// WITHSCORES).
pub fn map_from_pairs(reply: Reply) -> ContainerMap {
    let mut map = ContainerMap::default();
    let Reply::Array(items) = reply else {
        return map;
    };
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        if let (Reply::Bulk(f), Reply::Bulk(v)) = (field, value) {
            map.insert(f, v);
        }
    }
    map
}

/// Plain member list → map with empty values (set).
pub fn map_from_members(reply: Reply) -> ContainerMap {
    let mut map = ContainerMap::default();
    let Reply::Array(items) = reply else {
        return map;
    };
    for item in items {
        if let Reply::Bulk(member) = item {
            map.insert(member, Vec::new());
        }
    }
    map
}

/// Element list → vec (list).
pub fn list_from_reply(reply: Reply) -> Vec<Vec<u8>> {
    let Reply::Array(items) = reply else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Reply::Bulk(b) => Some(b),
            _ => None,
        })
        .collect()
}

/// Scalar comparison. Emptiness (absent or empty payload) on one side
/// only is a lack; otherwise byte equality decides.
pub fn compare_string(source: &[u8], target: &[u8]) -> ConflictKind {
    if source.is_empty() {
        if target.is_empty() {
            ConflictKind::Equal
        } else {
            ConflictKind::LackSource
        }
    } else if target.is_empty() {
        ConflictKind::LackTarget
    } else if source != target {
        ConflictKind::Value
    } else {
        ConflictKind::Equal
    }
}

/// Outcome of a container comparison: the differing sub-elements plus how
/// many compared equal (for the field counters).
pub struct MapDiff {
    pub fields: Vec<FieldRecord>,
    pub equal_fields: usize,
}

/// Map comparison for hash/set/zset. Drains the target map while walking
/// the source: missing on target ⇒ `lack_target`, differing value ⇒
/// `value`; whatever survives in the target was missing on the source.
pub fn compare_map(source: ContainerMap, mut target: ContainerMap) -> MapDiff {
    let mut diff = MapDiff {
        fields: Vec::new(),
        equal_fields: 0,
    };

    for (field, value) in source {
        match target.remove(&field) {
            None => diff
                .fields
                .push(FieldRecord::new(field, ConflictKind::LackTarget)),
            Some(target_value) => {
                if value != target_value {
                    diff.fields.push(FieldRecord::new(field, ConflictKind::Value));
                } else {
                    diff.equal_fields += 1;
                }
            }
        }
    }
    for (field, _) in target {
        diff.fields
            .push(FieldRecord::new(field, ConflictKind::LackSource));
    }
    diff
}

/// Index-by-index list comparison over the overlapped prefix; reports
/// only the first differing position, as list shapes shift in flight.
pub fn compare_list(source: &[Vec<u8>], target: &[Vec<u8>]) -> Option<FieldRecord> {
    source
        .iter()
        .zip(target)
        .position(|(s, t)| s != t)
        .map(|i| FieldRecord::new(i.to_string().into_bytes(), ConflictKind::Value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&[u8], &[u8])]) -> ContainerMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect()
    }

    #[test]
    fn test_compare_string_matrix() {
        assert_eq!(compare_string(b"", b""), ConflictKind::Equal);
        assert_eq!(compare_string(b"", b"x"), ConflictKind::LackSource);
        assert_eq!(compare_string(b"x", b""), ConflictKind::LackTarget);
        assert_eq!(compare_string(b"x", b"y"), ConflictKind::Value);
        assert_eq!(compare_string(b"x", b"x"), ConflictKind::Equal);
    }

    #[test]
    fn test_compare_map_all_outcomes() {
        let source = map(&[(b"a", b"1"), (b"b", b"2"), (b"same", b"v")]);
        let target = map(&[(b"b", b"9"), (b"c", b"3"), (b"same", b"v")]);

        let diff = compare_map(source, target);
        assert_eq!(diff.equal_fields, 1);
        assert_eq!(diff.fields.len(), 3);

        let kind_of = |name: &[u8]| {
            diff.fields
                .iter()
                .find(|f| f.field == name)
                .map(|f| f.conflict)
                .unwrap()
        };
        assert_eq!(kind_of(b"a"), ConflictKind::LackTarget);
        assert_eq!(kind_of(b"b"), ConflictKind::Value);
        assert_eq!(kind_of(b"c"), ConflictKind::LackSource);
    }

    #[test]
    fn test_empty_field_value_is_equal() {
        let diff = compare_map(map(&[(b"f", b"")]), map(&[(b"f", b"")]));
        assert!(diff.fields.is_empty());
        assert_eq!(diff.equal_fields, 1);
    }

    #[test]
    fn test_compare_list_first_mismatch_only() {
        let source = vec![b"a".to_vec(), b"b".to_vec(), b"x".to_vec(), b"y".to_vec()];
        let target = vec![b"a".to_vec(), b"B".to_vec(), b"X".to_vec()];

        let field = compare_list(&source, &target).unwrap();
        assert_eq!(field.field, b"1");
        assert_eq!(field.conflict, ConflictKind::Value);

        // equal overlapped prefix: no conflict even with differing lengths
        assert!(compare_list(&source[..2], &source).is_none());
    }
}
