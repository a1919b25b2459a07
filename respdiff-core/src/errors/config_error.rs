//! Configuration validation errors; these abort before any work begins.

/// A rejected configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid --{flag}: {reason}")]
    Invalid { flag: &'static str, reason: String },

    #[error("invalid address `{address}`: {reason}")]
    Address { address: String, reason: String },
}
