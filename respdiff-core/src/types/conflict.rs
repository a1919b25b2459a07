//! Classification of a key (or a single sub-element) after comparison.

use serde::{Deserialize, Serialize};

/// How a key or field differs between the two endpoints.
///
/// `Equal` and `Unset` are internal sentinels: `Equal` records are counted
/// but never written, and `Unset` only exists before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Type,
    Value,
    LackSource,
    LackTarget,
    Equal,
    Unset,
}

impl ConflictKind {
    /// Number of variants; sizes the metric matrices.
    pub const COUNT: usize = 6;

    /// All variants in matrix-index order.
    pub const ALL: [ConflictKind; Self::COUNT] = [
        ConflictKind::Type,
        ConflictKind::Value,
        ConflictKind::LackSource,
        ConflictKind::LackTarget,
        ConflictKind::Equal,
        ConflictKind::Unset,
    ];

    /// Canonical name, also the persisted text form.
    pub fn name(self) -> &'static str {
        match self {
            ConflictKind::Type => "type",
            ConflictKind::Value => "value",
            ConflictKind::LackSource => "lack_source",
            ConflictKind::LackTarget => "lack_target",
            ConflictKind::Equal => "equal",
            ConflictKind::Unset => "unset",
        }
    }

    /// Parse a persisted text form; anything unrecognised maps to `Unset`,
    /// which the store scanner treats as corruption.
    pub fn from_name(s: &str) -> Self {
        match s {
            "type" => ConflictKind::Type,
            "value" => ConflictKind::Value,
            "lack_source" => ConflictKind::LackSource,
            "lack_target" => ConflictKind::LackTarget,
            "equal" => ConflictKind::Equal,
            _ => ConflictKind::Unset,
        }
    }

    /// Position in the metric matrices.
    pub fn index(self) -> usize {
        match self {
            ConflictKind::Type => 0,
            ConflictKind::Value => 1,
            ConflictKind::LackSource => 2,
            ConflictKind::LackTarget => 3,
            ConflictKind::Equal => 4,
            ConflictKind::Unset => 5,
        }
    }

    /// True for the kinds that appear in user-visible results.
    pub fn is_conflict(self) -> bool {
        !matches!(self, ConflictKind::Equal | ConflictKind::Unset)
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for kind in ConflictKind::ALL {
            if kind == ConflictKind::Unset {
                continue;
            }
            assert_eq!(ConflictKind::from_name(kind.name()), kind);
        }
        assert_eq!(ConflictKind::from_name("bogus"), ConflictKind::Unset);
    }

    #[test]
    fn test_sentinels_are_not_conflicts() {
        assert!(!ConflictKind::Equal.is_conflict());
        assert!(!ConflictKind::Unset.is_conflict());
        assert!(ConflictKind::LackTarget.is_conflict());
    }
}
