//! Hash collections used throughout the workspace.
//!
//! FxHash is a fast, non-cryptographic hasher; key and member bytes come
//! from trusted endpoints, so DoS-resistant hashing buys nothing here.

pub use rustc_hash::{FxHashMap, FxHashSet};
