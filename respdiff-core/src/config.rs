//! Run configuration, validated before any connection is opened.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_BIG_KEY_THRESHOLD;
use crate::errors::ConfigError;
use crate::types::collections::FxHashSet;

/// How an endpoint is deployed, which decides connection setup and the
/// shape of the keyspace scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointKind {
    /// One node, logical databases selected via `SELECT`.
    Single,
    /// Slot-sharded cluster; commands are routed per key.
    Cluster,
    /// Proxy fronting n nodes, scanned per shard index via `ISCAN`.
    IscanProxy,
    /// Proxy fronting a cluster, scanned per node id appended to `SCAN`.
    NodeProxy,
}

impl EndpointKind {
    pub fn name(self) -> &'static str {
        match self {
            EndpointKind::Single => "single",
            EndpointKind::Cluster => "cluster",
            EndpointKind::IscanProxy => "iscan-proxy",
            EndpointKind::NodeProxy => "node-proxy",
        }
    }
}

/// Authentication command sent once per connection when a password is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthCommand {
    Auth,
    AdminAuth,
}

impl AuthCommand {
    pub fn command(self) -> &'static str {
        match self {
            AuthCommand::Auth => "AUTH",
            AuthCommand::AdminAuth => "ADMINAUTH",
        }
    }
}

/// One side of the comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Node addresses; more than one only for cluster endpoints.
    pub addrs: Vec<String>,
    pub kind: EndpointKind,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_auth")]
    pub auth_command: AuthCommand,
    /// Logical databases to compare; `None` means every db the endpoint
    /// reports.
    #[serde(default)]
    pub db_whitelist: Option<FxHashSet<i32>>,
    /// Connect/read/write timeout. 0 disables the timeout.
    #[serde(default)]
    pub timeout_ms: u64,
}

fn default_auth() -> AuthCommand {
    AuthCommand::Auth
}

impl EndpointConfig {
    pub fn new(addrs: Vec<String>, kind: EndpointKind) -> Self {
        Self {
            addrs,
            kind,
            password: None,
            auth_command: AuthCommand::Auth,
            db_whitelist: None,
            timeout_ms: 0,
        }
    }

    pub fn is_cluster(&self) -> bool {
        self.kind == EndpointKind::Cluster
    }

    /// Parse a `;`-separated logical-db whitelist; `-1` anywhere means
    /// "all databases".
    pub fn parse_db_whitelist(list: &str) -> Result<Option<FxHashSet<i32>>, ConfigError> {
        let mut set = FxHashSet::default();
        for part in list.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let db: i32 = part.parse().map_err(|_| ConfigError::Invalid {
                flag: "db-whitelist",
                reason: format!("`{part}` is not an integer"),
            })?;
            if db == -1 {
                return Ok(None);
            }
            if db < 0 {
                return Err(ConfigError::Invalid {
                    flag: "db-whitelist",
                    reason: format!("db {db} out of range"),
                });
            }
            set.insert(db);
        }
        if set.is_empty() {
            Ok(None)
        } else {
            Ok(Some(set))
        }
    }
}

/// Comparison strategy, selected once at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMode {
    /// Byte-for-byte value comparison, paged for big containers.
    Full,
    /// Presence + type + cardinality only.
    ValueOutline,
    /// Presence only.
    KeyOutline,
    /// Full, but big containers are compared by cardinality alone.
    FullIgnoreBig,
}

impl CompareMode {
    /// Numeric flag form used on the command line.
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            1 => Some(CompareMode::Full),
            2 => Some(CompareMode::ValueOutline),
            3 => Some(CompareMode::KeyOutline),
            4 => Some(CompareMode::FullIgnoreBig),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompareMode::Full => "full",
            CompareMode::ValueOutline => "value-outline",
            CompareMode::KeyOutline => "key-outline",
            CompareMode::FullIgnoreBig => "full-ignore-big",
        }
    }
}

/// Everything a comparison run needs, assembled by the front-end and
/// validated once before work begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    pub source: EndpointConfig,
    pub target: EndpointConfig,
    pub mode: CompareMode,
    /// Result database path; round r writes `<path>.<r>`.
    pub result_db: PathBuf,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_batch")]
    pub batch_size: usize,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default = "default_qps")]
    pub qps: usize,
    /// 0 selects the built-in default threshold.
    #[serde(default)]
    pub big_key_threshold: i64,
    /// `|`-delimited key patterns; trailing `*` is a prefix match.
    #[serde(default)]
    pub filters: String,
    /// Flat per-conflict result file, written on the final round.
    #[serde(default)]
    pub result_file: Option<PathBuf>,
    /// JSON-lines metric file, appended on every stat rotation.
    #[serde(default)]
    pub metric_file: Option<PathBuf>,
}

fn default_rounds() -> u32 {
    3
}
fn default_interval() -> u64 {
    5
}
fn default_batch() -> usize {
    256
}
fn default_parallel() -> usize {
    5
}
fn default_qps() -> usize {
    15000
}

impl CheckConfig {
    /// Parse a config from TOML text, the file-based alternative to flags.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Invalid {
            flag: "config",
            reason: e.to_string(),
        })
    }

    /// The big-container cut-off with the 0-means-default rule applied.
    pub fn effective_big_key_threshold(&self) -> i64 {
        if self.big_key_threshold <= 0 {
            DEFAULT_BIG_KEY_THRESHOLD
        } else {
            self.big_key_threshold
        }
    }

    /// Reject out-of-range settings before any work begins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.addrs.is_empty() {
            return Err(ConfigError::Invalid {
                flag: "source",
                reason: "no address given".into(),
            });
        }
        if self.target.addrs.is_empty() {
            return Err(ConfigError::Invalid {
                flag: "target",
                reason: "no address given".into(),
            });
        }
        if self.rounds < 1 {
            return Err(ConfigError::Invalid {
                flag: "rounds",
                reason: format!("{} given, expected >= 1", self.rounds),
            });
        }
        if !(1..=10000).contains(&self.batch_size) {
            return Err(ConfigError::Invalid {
                flag: "batch-size",
                reason: format!("{} given, expected 1..=10000", self.batch_size),
            });
        }
        if !(1..=100).contains(&self.parallel) {
            return Err(ConfigError::Invalid {
                flag: "parallel",
                reason: format!("{} given, expected 1..=100", self.parallel),
            });
        }
        if !(1..=5_000_000).contains(&self.qps) {
            return Err(ConfigError::Invalid {
                flag: "qps",
                reason: format!("{} given, expected 1..=5000000", self.qps),
            });
        }
        if self.big_key_threshold < 0 {
            return Err(ConfigError::Invalid {
                flag: "big-key-threshold",
                reason: format!("{} given, expected >= 0", self.big_key_threshold),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> CheckConfig {
        CheckConfig {
            source: EndpointConfig::new(vec!["127.0.0.1:6000".into()], EndpointKind::Single),
            target: EndpointConfig::new(vec!["127.0.0.1:7000".into()], EndpointKind::Single),
            mode: CompareMode::Full,
            result_db: "result.db".into(),
            rounds: 3,
            interval_secs: 5,
            batch_size: 256,
            parallel: 5,
            qps: 15000,
            big_key_threshold: 0,
            filters: String::new(),
            result_file: None,
            metric_file: None,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_range_checks() {
        let mut cfg = base_config();
        cfg.rounds = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.batch_size = 10001;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.parallel = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.qps = 5_000_001;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_big_key_threshold_default() {
        let mut cfg = base_config();
        assert_eq!(cfg.effective_big_key_threshold(), 16384);
        cfg.big_key_threshold = 500;
        assert_eq!(cfg.effective_big_key_threshold(), 500);
    }

    #[test]
    fn test_mode_flags() {
        assert_eq!(CompareMode::from_flag(1), Some(CompareMode::Full));
        assert_eq!(CompareMode::from_flag(4), Some(CompareMode::FullIgnoreBig));
        assert_eq!(CompareMode::from_flag(5), None);
    }

    #[test]
    fn test_from_toml() {
        let cfg = CheckConfig::from_toml_str(
            r#"
            mode = "full"
            result_db = "out.db"
            rounds = 2

            [source]
            addrs = ["127.0.0.1:6000"]
            kind = "single"

            [target]
            addrs = ["127.0.0.1:7000;127.0.0.1:7001"]
            kind = "cluster"
            password = "secret"
            auth_command = "adminauth"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rounds, 2);
        assert_eq!(cfg.batch_size, 256);
        assert_eq!(cfg.mode, CompareMode::Full);
        assert!(cfg.target.is_cluster());
        assert_eq!(cfg.target.auth_command, AuthCommand::AdminAuth);
    }

    #[test]
    fn test_db_whitelist_parse() {
        assert_eq!(EndpointConfig::parse_db_whitelist("-1").unwrap(), None);
        let set = EndpointConfig::parse_db_whitelist("0;3;5").unwrap().unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains(&3));
        assert!(EndpointConfig::parse_db_whitelist("x").is_err());
    }
}
