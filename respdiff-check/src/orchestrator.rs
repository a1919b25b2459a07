//! The N-round scheduler.
//!
//! Per round and logical database: one scanner (fanning out per shard in
//! round 1), P verifier workers, one writer, all joined through bounded
//! channels; a stats ticker rotates counters until the round drains.
//! Any worker error cancels the round and fails the run: later rounds
//! depend on the previous round's tables being authoritative, so there
//! is no partial-result mode.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;

use respdiff_client::StoreClient;
use respdiff_core::constants::{CHANNEL_BOUND, STAT_ROLL_SECS};
use respdiff_core::{CheckConfig, CheckError, KeyFilter, KeyRecord, RateLimiter, Stat};
use respdiff_storage::{ConflictWriter, ResultDb};

use crate::context::{ConflictSink, RoundContext};
use crate::scan::{SourceScanner, StoreScanner};
use crate::verify::{build_verifier, Verifier};

pub struct Orchestrator {
    config: CheckConfig,
    stat: Arc<Stat>,
    verifier: Arc<dyn Verifier>,
    filter: Arc<KeyFilter>,
}

impl Orchestrator {
    /// Validate the configuration and assemble the selected strategy.
    pub fn new(config: CheckConfig) -> Result<Self, CheckError> {
        config.validate()?;
        let stat = Arc::new(Stat::new());
        let verifier = build_verifier(
            config.mode,
            Arc::clone(&stat),
            config.batch_size,
            config.effective_big_key_threshold(),
        );
        let filter = Arc::new(KeyFilter::from_patterns(&config.filters));
        Ok(Self {
            config,
            stat,
            verifier,
            filter,
        })
    }

    pub fn stat(&self) -> &Arc<Stat> {
        &self.stat
    }

    /// Run every round over every logical database.
    pub fn run(&self) -> Result<(), CheckError> {
        if let Some(path) = &self.config.metric_file {
            let _ = std::fs::remove_file(path);
        }

        let mut discovery = StoreClient::new(&self.config.source, 0)?;
        let base = discovery.fetch_base_info()?;
        drop(discovery);

        let mut dbs: Vec<(i32, i64)> = base.logical_dbs.iter().map(|(&db, &n)| (db, n)).collect();
        dbs.sort_unstable();
        for &(db, keys) in &dbs {
            if self.config.source.is_cluster() {
                tracing::info!(db, keys, "source keyspace (key count inaccurate for cluster)");
            } else {
                tracing::info!(db, keys, "source keyspace");
            }
        }
        tracing::info!(shards = base.shards.len(), mode = self.config.mode.name(), "starting comparison");

        for round in 1..=self.config.rounds {
            // tables for this round exist before any worker starts
            ResultDb::create(&self.config.result_db, round, self.config.rounds)?;

            if round > 1 {
                tracing::info!(
                    seconds = self.config.interval_secs,
                    "waiting before next round"
                );
                thread::sleep(Duration::from_secs(self.config.interval_secs));
            }
            tracing::info!(round, "starting comparison round");

            for &(db, db_keys) in &dbs {
                self.run_db_segment(round, db, db_keys, &base.shards)?;
            }
        }

        tracing::info!(
            key_conflicts = self.stat.total_conflict_keys(),
            field_conflicts = self.stat.total_conflict_fields(),
            "comparison finished"
        );
        Ok(())
    }

    /// One (round, logical database) pipeline: scan → P verifiers →
    /// write, plus the stats ticker.
    fn run_db_segment(
        &self,
        round: u32,
        db: i32,
        db_keys: i64,
        shards: &[String],
    ) -> Result<(), CheckError> {
        tracing::info!(round, db, "comparing logical database");
        let final_round = round == self.config.rounds;
        let ctx = RoundContext::new();
        let limiter = Arc::new(RateLimiter::start(self.config.qps));

        let writer_db = ResultDb::open(&self.config.result_db, round, self.config.rounds)?;
        let writer = ConflictWriter::new(
            writer_db,
            self.config.source.addrs.join(";"),
            self.config.target.addrs.join(";"),
            final_round,
            self.config.result_file.as_deref(),
        )?;

        let prior_db = if round > 1 {
            Some(ResultDb::open(
                &self.config.result_db,
                round - 1,
                self.config.rounds,
            )?)
        } else {
            None
        };

        let (key_tx, key_rx) = bounded::<Vec<KeyRecord>>(CHANNEL_BOUND);
        let (conflict_tx, conflict_rx) = bounded::<KeyRecord>(CHANNEL_BOUND);
        let ticker_stop = Arc::new(AtomicBool::new(false));

        thread::scope(|s| {
            // stats ticker, stopped when the segment drains
            {
                let stop = Arc::clone(&ticker_stop);
                s.spawn(move || {
                    while !poll_sleep(&stop, Duration::from_secs(STAT_ROLL_SECS)) {
                        self.stat.rotate();
                        self.emit_stat(round, db, db_keys, false);
                    }
                });
            }

            // single writer
            let writer_handle = {
                let ctx = Arc::clone(&ctx);
                s.spawn(move || {
                    writer.drain(conflict_rx).map_err(|e| {
                        let err = CheckError::from(e);
                        ctx.fail(CheckError::Cancelled);
                        err
                    })
                })
            };

            // scanner: live endpoint in round 1, prior tables afterwards
            {
                let ctx = Arc::clone(&ctx);
                let key_tx = key_tx.clone();
                let batch_size = self.config.batch_size;
                let stat = Arc::clone(&self.stat);
                let filter = Arc::clone(&self.filter);
                let source = self.config.source.clone();
                let shards = shards.to_vec();
                s.spawn(move || match &prior_db {
                    None => {
                        let scanner = SourceScanner::new(
                            source,
                            shards,
                            db,
                            batch_size,
                            filter,
                            stat,
                        );
                        scanner.run(key_tx, &ctx);
                    }
                    Some(prior) => {
                        let scanner = StoreScanner::new(db, batch_size, stat);
                        if let Err(e) = scanner.run(prior, &key_tx, &ctx) {
                            ctx.fail(e);
                        }
                    }
                });
            }
            drop(key_tx);

            // P verifier workers, each with its own client pair
            for worker in 0..self.config.parallel {
                let ctx = Arc::clone(&ctx);
                let key_rx = key_rx.clone();
                let sink = ConflictSink::new(conflict_tx.clone(), Arc::clone(&ctx));
                let limiter = Arc::clone(&limiter);
                let verifier = Arc::clone(&self.verifier);
                let source = self.config.source.clone();
                let target = self.config.target.clone();
                s.spawn(move || {
                    let clients = StoreClient::new(&source, db)
                        .and_then(|s| StoreClient::new(&target, db).map(|t| (s, t)));
                    let (mut source_client, mut target_client) = match clients {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::error!(worker, error = %e, "verifier failed to connect");
                            ctx.fail(e.into());
                            return;
                        }
                    };

                    for batch in key_rx {
                        if ctx.is_cancelled() {
                            break;
                        }
                        if batch.is_empty() {
                            continue;
                        }
                        limiter.acquire();
                        if let Err(e) = verifier.verify_batch(
                            batch,
                            &sink,
                            &mut source_client,
                            &mut target_client,
                        ) {
                            ctx.fail(e);
                            break;
                        }
                    }
                });
            }
            drop(key_rx);
            drop(conflict_tx);

            // the writer returns once every verifier has dropped its sink
            match writer_handle.join() {
                Ok(Ok(stats)) => {
                    tracing::debug!(round, db, keys = stats.keys, fields = stats.fields, "writer drained");
                }
                Ok(Err(e)) => ctx.fail(e),
                Err(_) => ctx.fail(CheckError::WorkerPanic { worker: "writer" }),
            }
            ticker_stop.store(true, Ordering::Relaxed);
        });

        // final rotation so the closing snapshot carries fresh speeds
        self.stat.rotate();
        self.emit_stat(round, db, db_keys, true);
        // fold this segment's conflicts into the cross-round totals
        self.stat.reset(true);

        match ctx.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn emit_stat(&self, round: u32, db: i32, db_keys: i64, finished: bool) {
        let progress = if self.config.source.is_cluster() || db_keys == 0 {
            -1
        } else {
            self.stat.scan.total() * 100 * round as i64 / (db_keys * self.config.rounds as i64)
        };

        tracing::info!(
            round,
            db,
            finished,
            progress,
            scanned = self.stat.scan.total(),
            scan_speed = self.stat.scan.speed(),
            key_conflicts = self.stat.current_key_conflicts(),
            field_conflicts = self.stat.current_field_conflicts(),
            "stat"
        );

        if let Some(path) = &self.config.metric_file {
            let snapshot = self.stat.snapshot(round, db, db_keys, finished);
            let line = snapshot.to_json();
            let appended = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut file| writeln!(file, "{line}"));
            if let Err(e) = appended {
                tracing::warn!(path = %path.display(), error = %e, "metric file write failed");
            }
        }
    }
}

/// Sleep up to `period` in short slices; true once `stop` is raised.
fn poll_sleep(stop: &AtomicBool, period: Duration) -> bool {
    let slice = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < period {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        thread::sleep(slice);
        waited += slice;
    }
    stop.load(Ordering::Relaxed)
}
