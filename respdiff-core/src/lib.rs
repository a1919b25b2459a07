//! # respdiff-core
//!
//! Foundation crate for the respdiff comparison engine.
//! Defines the conflict model, configuration, errors, key filter,
//! rate limiter, and metric counters.
//! Every other crate in the workspace depends on this.

pub mod config;
pub mod constants;
pub mod errors;
pub mod filter;
pub mod metrics;
pub mod rate_limit;
pub mod types;

// Re-export the most commonly used types at the crate root.
pub use config::{AuthCommand, CheckConfig, CompareMode, EndpointConfig, EndpointKind};
pub use errors::{CheckError, ClientError, ConfigError, StorageError};
pub use filter::KeyFilter;
pub use metrics::{SpeedCounter, Stat};
pub use rate_limit::RateLimiter;
pub use types::collections::{FxHashMap, FxHashSet};
pub use types::{ConflictKind, EndpointAttr, FieldRecord, KeyRecord, ValueType};
