//! Candidate-key producers.
//!
//! Round 1 scans the live source endpoint, one worker per physical
//! shard, all feeding one bounded channel. Rounds 2+ re-read the
//! previous round's conflict tables in surrogate-id order. The scanner
//! side is the sole closer of its channel: workers drop their senders
//! when the cursor wraps (or the round is cancelled).

use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;

use respdiff_client::endpoint::scan_command;
use respdiff_client::{Reply, StoreClient};
use respdiff_core::{
    CheckError, EndpointConfig, EndpointKind, KeyFilter, KeyRecord, Stat,
};
use respdiff_storage::ResultDb;

use crate::context::RoundContext;

/// Round-1 scanner over the live source endpoint.
pub struct SourceScanner {
    endpoint: EndpointConfig,
    shards: Vec<String>,
    db: i32,
    batch_size: usize,
    filter: Arc<KeyFilter>,
    stat: Arc<Stat>,
}

impl SourceScanner {
    pub fn new(
        endpoint: EndpointConfig,
        shards: Vec<String>,
        db: i32,
        batch_size: usize,
        filter: Arc<KeyFilter>,
        stat: Arc<Stat>,
    ) -> Self {
        Self {
            endpoint,
            shards,
            db,
            batch_size,
            filter,
            stat,
        }
    }

    /// The endpoint one shard worker dials: cluster shards are addressed
    /// directly as single nodes; everything else goes through the
    /// configured endpoint.
    fn shard_endpoint(&self, shard: &str) -> EndpointConfig {
        if self.endpoint.is_cluster() {
            let mut single = self.endpoint.clone();
            single.addrs = vec![shard.to_string()];
            single.kind = EndpointKind::Single;
            single
        } else {
            self.endpoint.clone()
        }
    }

    /// Fan out one worker per shard; workers join before the channel
    /// closes. Fatal errors land in the round context.
    pub fn run(&self, out: Sender<Vec<KeyRecord>>, ctx: &Arc<RoundContext>) {
        thread::scope(|s| {
            for (index, shard) in self.shards.iter().enumerate() {
                let out = out.clone();
                let ctx = Arc::clone(ctx);
                s.spawn(move || {
                    if let Err(e) = self.scan_shard(index, shard, &out, &ctx) {
                        ctx.fail(e);
                    }
                });
            }
        });
        // all worker senders dropped here; the original `out` follows
    }

    fn scan_shard(
        &self,
        index: usize,
        shard: &str,
        out: &Sender<Vec<KeyRecord>>,
        ctx: &RoundContext,
    ) -> Result<(), CheckError> {
        let endpoint = self.shard_endpoint(shard);
        let mut client = StoreClient::new(&endpoint, self.db)?;
        tracing::info!(shard, db = self.db, "scan worker connected");

        let mut cursor: u64 = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(CheckError::Cancelled);
            }

            let cmd = scan_command(self.endpoint.kind, shard, index, cursor, self.batch_size);
            let (next, keys) = client.do_command(&cmd)?.into_cursor_page("SCAN")?;

            let mut batch = Vec::with_capacity(keys.len());
            for key in keys {
                let Reply::Bulk(key) = key else {
                    return Err(CheckError::Scan {
                        message: "scan returned a non-bulk key".to_string(),
                    });
                };
                if !self.filter.matches(&key) {
                    continue;
                }
                batch.push(KeyRecord::scanned(key, self.db));
            }

            self.stat.scan.inc(batch.len() as i64);
            ctx.send(out, batch)?;

            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }
}

/// Rounds-2+ scanner over the previous round's conflict tables.
pub struct StoreScanner {
    db: i32,
    batch_size: usize,
    stat: Arc<Stat>,
}

impl StoreScanner {
    pub fn new(db: i32, batch_size: usize, stat: Arc<Stat>) -> Self {
        Self {
            db,
            batch_size,
            stat,
        }
    }

    /// Stream the prior round's records in id order. Corrupt rows
    /// (`unknown` type, `unset` conflict) abort the run inside
    /// `read_prior_batch`.
    pub fn run(
        &self,
        prior: &ResultDb,
        out: &Sender<Vec<KeyRecord>>,
        ctx: &RoundContext,
    ) -> Result<(), CheckError> {
        let mut after_id = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(CheckError::Cancelled);
            }

            let (records, last_id) = prior.read_prior_batch(self.db, after_id, self.batch_size)?;
            if records.is_empty() {
                return Ok(());
            }
            after_id = last_id;

            self.stat.scan.inc(records.len() as i64);
            ctx.send(out, records)?;
        }
    }
}
