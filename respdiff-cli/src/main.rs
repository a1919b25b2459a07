//! respdiff: compare the data contents of two RESP stores and write a
//! persistent reconciliation report.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use respdiff_check::Orchestrator;
use respdiff_client::endpoint::parse_address_list;
use respdiff_core::{
    AuthCommand, CheckConfig, CompareMode, ConfigError, EndpointConfig, EndpointKind,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    /// One node, logical databases via SELECT.
    Single,
    /// Slot-sharded cluster.
    Cluster,
    /// Proxy scanned per shard index via ISCAN.
    IscanProxy,
    /// Proxy scanned per node id appended to SCAN.
    NodeProxy,
}

impl From<KindArg> for EndpointKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Single => EndpointKind::Single,
            KindArg::Cluster => EndpointKind::Cluster,
            KindArg::IscanProxy => EndpointKind::IscanProxy,
            KindArg::NodeProxy => EndpointKind::NodeProxy,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "respdiff",
    version,
    about = "Compare the data contents of two RESP stores and report every difference"
)]
struct Args {
    /// Source endpoint, `host:port` (cluster lists `;`-separated, an
    /// optional `master@`/`slave@` prefix tags the role).
    #[arg(short = 's', long)]
    source: String,

    /// Source password.
    #[arg(short = 'p', long)]
    source_password: Option<String>,

    /// Source auth command: auth or adminauth.
    #[arg(long, default_value = "auth")]
    source_auth_type: String,

    /// Source deployment kind.
    #[arg(long, value_enum, default_value_t = KindArg::Single)]
    source_kind: KindArg,

    /// Source logical-db whitelist, `;`-separated; -1 means all.
    #[arg(long, default_value = "-1")]
    source_dbs: String,

    /// Target endpoint, same syntax as --source.
    #[arg(short = 't', long)]
    target: String,

    /// Target password.
    #[arg(short = 'a', long)]
    target_password: Option<String>,

    /// Target auth command: auth or adminauth.
    #[arg(long, default_value = "auth")]
    target_auth_type: String,

    /// Target deployment kind.
    #[arg(long, value_enum, default_value_t = KindArg::Single)]
    target_kind: KindArg,

    /// Target logical-db whitelist, `;`-separated; -1 means all.
    #[arg(long, default_value = "-1")]
    target_dbs: String,

    /// Result database file; round r writes `<file>.<r>` (pre-existing
    /// files are replaced).
    #[arg(short = 'd', long = "db", default_value = "result.db")]
    result_db: PathBuf,

    /// Comparison rounds; round 1 scans everything, later rounds
    /// re-examine the previous round's conflicts.
    #[arg(long, default_value_t = 3)]
    rounds: u32,

    /// Seconds to wait between rounds.
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Keys (or fields) per batched comparison, 1..=10000.
    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    /// Verifier workers, 1..=100.
    #[arg(long, default_value_t = 5)]
    parallel: usize,

    /// Max compared batches per second, 1..=5000000.
    #[arg(short = 'q', long, default_value_t = 15000)]
    qps: usize,

    /// Strategy: 1 full value, 2 value outline, 3 key outline, 4 full
    /// value ignoring big containers.
    #[arg(short = 'm', long, default_value_t = 2)]
    mode: u8,

    /// Container cardinality above which values are paged; 0 selects the
    /// built-in default.
    #[arg(long, default_value_t = 0)]
    big_key_threshold: i64,

    /// `|`-separated key patterns; a trailing `*` makes the pattern a
    /// prefix match. Empty compares everything.
    #[arg(short = 'f', long, default_value = "")]
    filter: String,

    /// Flat result file written on the final round, one
    /// `db<TAB>conflict<TAB>key<TAB>field` row per conflict.
    #[arg(long)]
    result: Option<PathBuf>,

    /// JSON-lines metric file appended on every stat rotation.
    #[arg(long)]
    metric_file: Option<PathBuf>,

    /// Log file; defaults to stderr.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Log level: debug, info, warn, or error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_auth(flag: &'static str, value: &str) -> Result<AuthCommand, ConfigError> {
    match value {
        "auth" => Ok(AuthCommand::Auth),
        "adminauth" => Ok(AuthCommand::AdminAuth),
        other => Err(ConfigError::Invalid {
            flag,
            reason: format!("`{other}` given, expected auth or adminauth"),
        }),
    }
}

fn build_endpoint(
    flag: &'static str,
    address: &str,
    kind: KindArg,
    password: Option<String>,
    auth_type: &str,
    dbs: &str,
) -> Result<EndpointConfig, ConfigError> {
    let addrs = parse_address_list(address)?;
    let mut endpoint = EndpointConfig::new(addrs, kind.into());
    endpoint.password = password;
    endpoint.auth_command = parse_auth(flag, auth_type)?;
    endpoint.db_whitelist = EndpointConfig::parse_db_whitelist(dbs)?;
    Ok(endpoint)
}

fn build_config(args: &Args) -> Result<CheckConfig, ConfigError> {
    let mode = CompareMode::from_flag(args.mode).ok_or(ConfigError::Invalid {
        flag: "mode",
        reason: format!("{} given, expected 1..=4", args.mode),
    })?;

    let config = CheckConfig {
        source: build_endpoint(
            "source-auth-type",
            &args.source,
            args.source_kind,
            args.source_password.clone(),
            &args.source_auth_type,
            &args.source_dbs,
        )?,
        target: build_endpoint(
            "target-auth-type",
            &args.target,
            args.target_kind,
            args.target_password.clone(),
            &args.target_auth_type,
            &args.target_dbs,
        )?,
        mode,
        result_db: args.result_db.clone(),
        rounds: args.rounds,
        interval_secs: args.interval,
        batch_size: args.batch_size,
        parallel: args.parallel,
        qps: args.qps,
        big_key_threshold: args.big_key_threshold,
        filters: args.filter.clone(),
        result_file: args.result.clone(),
        metric_file: args.metric_file.clone(),
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(args: &Args) -> Result<(), String> {
    if !matches!(args.log_level.as_str(), "debug" | "info" | "warn" | "error") {
        return Err(format!(
            "unknown log level `{}`, expected debug, info, warn, or error",
            args.log_level
        ));
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));

    match &args.log {
        Some(path) => {
            let file = File::create(path).map_err(|e| format!("open {}: {e}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(message) = init_tracing(&args) {
        eprintln!("log setup failed: {message}");
        return ExitCode::FAILURE;
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match orchestrator.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "comparison aborted");
            ExitCode::FAILURE
        }
    }
}
