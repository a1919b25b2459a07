//! Token-bucket rate limiter pacing verifier batches per second.
//!
//! The bucket holds at most one second's worth of tokens. A refill thread
//! tops it up once per second with non-blocking sends; overflow tokens are
//! discarded. Consumers block on [`RateLimiter::acquire`] before each work
//! unit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Blocking QPS limiter backed by a refill thread.
pub struct RateLimiter {
    bucket: Receiver<()>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RateLimiter {
    /// Start a limiter allowing `qps` acquisitions per second.
    /// The bucket starts full so callers are not stalled on the first tick.
    pub fn start(qps: usize) -> Self {
        let (tx, rx) = bounded(qps.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        fill(&tx, qps);

        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("respdiff-qos".to_string())
            .spawn(move || refill_loop(tx, qps, &stop_flag))
            .expect("failed to spawn rate limiter thread");

        Self {
            bucket: rx,
            stop,
            handle: Some(handle),
        }
    }

    /// Take one token, blocking until the next refill if the bucket is dry.
    /// Returns immediately once the limiter has been shut down.
    pub fn acquire(&self) {
        let _ = self.bucket.recv();
    }

    /// Stop the refill thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn refill_loop(tx: Sender<()>, qps: usize, stop: &AtomicBool) {
    loop {
        thread::sleep(Duration::from_secs(1));
        if stop.load(Ordering::Relaxed) {
            return;
        }
        fill(&tx, qps);
    }
}

fn fill(tx: &Sender<()>, qps: usize) {
    for _ in 0..qps {
        if tx.try_send(()).is_err() {
            // bucket full
            break;
        }
    }
}
