//! Value shapes a key can hold, as reported by the `TYPE` command.

use serde::{Deserialize, Serialize};

/// The shape of a key's value on an endpoint.
///
/// `None` means the key is absent; `Unknown` means the type has not been
/// probed yet (fresh scan output) or did not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Hash,
    List,
    Set,
    Zset,
    Stream,
    None,
    Unknown,
}

impl ValueType {
    /// Number of variants; sizes the metric matrices.
    pub const COUNT: usize = 8;

    /// All variants in matrix-index order.
    pub const ALL: [ValueType; Self::COUNT] = [
        ValueType::String,
        ValueType::Hash,
        ValueType::List,
        ValueType::Set,
        ValueType::Zset,
        ValueType::Stream,
        ValueType::None,
        ValueType::Unknown,
    ];

    /// Parse the bulk/status payload of a `TYPE` reply.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "string" => ValueType::String,
            "hash" => ValueType::Hash,
            "list" => ValueType::List,
            "set" => ValueType::Set,
            "zset" => ValueType::Zset,
            "stream" => ValueType::Stream,
            "none" => ValueType::None,
            _ => ValueType::Unknown,
        }
    }

    /// Canonical name, also the persisted text form.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Hash => "hash",
            ValueType::List => "list",
            ValueType::Set => "set",
            ValueType::Zset => "zset",
            ValueType::Stream => "stream",
            ValueType::None => "none",
            ValueType::Unknown => "unknown",
        }
    }

    /// The command that yields this type's cardinality.
    ///
    /// `None`/`Unknown` fall back to `STRLEN`, which answers 0 for an
    /// absent key instead of erroring.
    pub fn len_command(self) -> &'static str {
        match self {
            ValueType::String => "STRLEN",
            ValueType::Hash => "HLEN",
            ValueType::List => "LLEN",
            ValueType::Set => "SCARD",
            ValueType::Zset => "ZCARD",
            ValueType::Stream => "XLEN",
            ValueType::None | ValueType::Unknown => "STRLEN",
        }
    }

    /// Position in the metric matrices.
    pub fn index(self) -> usize {
        match self {
            ValueType::String => 0,
            ValueType::Hash => 1,
            ValueType::List => 2,
            ValueType::Set => 3,
            ValueType::Zset => 4,
            ValueType::Stream => 5,
            ValueType::None => 6,
            ValueType::Unknown => 7,
        }
    }

    /// Whether sub-element (field-level) conflicts exist for this type.
    pub fn has_fields(self) -> bool {
        matches!(
            self,
            ValueType::Hash | ValueType::List | ValueType::Set | ValueType::Zset
        )
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
