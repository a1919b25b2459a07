//! Process-wide constants shared by the client, checker, and storage layers.

use std::time::Duration;

/// Transport errors are retried this many times before giving up.
pub const MAX_RETRY_COUNT: u32 = 20;

/// Sleep between transport retries; the connection is re-dialed afterwards.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Stat counters rotate (speed snapshot + delta reset) on this period.
pub const STAT_ROLL_SECS: u64 = 2;

/// Sentinel stored in `EndpointAttr::item_count` when a probe hit a
/// `WRONGTYPE` reply, i.e. the key changed type between scan and probe.
pub const TYPE_CHANGED: i64 = -1;

/// Containers above this cardinality are paged instead of fetched whole.
pub const DEFAULT_BIG_KEY_THRESHOLD: i64 = 16384;

/// Bound of the scanner→verifier and verifier→writer channels.
pub const CHANNEL_BOUND: usize = 1024;

/// Page size floor for stream entry walks.
pub const STREAM_SEGMENT: i64 = 5000;

/// Hard cap on the `LRANGE` window used for paged list comparison.
pub const LIST_PAGE_CAP: usize = 10240;
