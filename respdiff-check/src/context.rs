//! Per-round cancellation and error propagation.
//!
//! Replaces the panic-in-worker pattern: any worker that hits a fatal
//! error flips the shared error cell, which raises the cancellation flag;
//! the orchestrator drains the pipeline, reports the first error, and the
//! process exits nonzero.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Sender;

use respdiff_core::{CheckError, KeyRecord};

const SEND_POLL: Duration = Duration::from_millis(100);

/// Shared state of one (round, db) pipeline run.
#[derive(Default)]
pub struct RoundContext {
    cancelled: AtomicBool,
    error: Mutex<Option<CheckError>>,
}

impl RoundContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Record a fatal error (first one wins) and cancel the round.
    /// `Cancelled` markers propagate the shutdown without overwriting the
    /// original cause.
    pub fn fail(&self, err: CheckError) {
        if !matches!(err, CheckError::Cancelled) {
            let mut cell = self.error.lock().expect("error cell lock");
            if cell.is_none() {
                *cell = Some(err);
            }
        }
        self.cancel();
    }

    /// Take the recorded error, if any, once the pipeline has drained.
    pub fn take_error(&self) -> Option<CheckError> {
        self.error.lock().expect("error cell lock").take()
    }

    /// Send on a bounded channel while staying responsive to
    /// cancellation. Fails with `Cancelled` once the round is shutting
    /// down or the receiving side is gone.
    pub fn send<T>(&self, tx: &Sender<T>, mut item: T) -> Result<(), CheckError> {
        loop {
            if self.is_cancelled() {
                return Err(CheckError::Cancelled);
            }
            match tx.send_timeout(item, SEND_POLL) {
                Ok(()) => return Ok(()),
                Err(crossbeam_channel::SendTimeoutError::Timeout(back)) => item = back,
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                    return Err(CheckError::Cancelled)
                }
            }
        }
    }
}

/// The verifiers' handle on the conflict channel.
#[derive(Clone)]
pub struct ConflictSink {
    tx: Sender<KeyRecord>,
    ctx: Arc<RoundContext>,
}

impl ConflictSink {
    pub fn new(tx: Sender<KeyRecord>, ctx: Arc<RoundContext>) -> Self {
        Self { tx, ctx }
    }

    /// Hand a conflicting record to the writer.
    pub fn send(&self, record: KeyRecord) -> Result<(), CheckError> {
        self.ctx.send(&self.tx, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_first_error_wins() {
        let ctx = RoundContext::new();
        ctx.fail(CheckError::Scan {
            message: "first".into(),
        });
        ctx.fail(CheckError::Scan {
            message: "second".into(),
        });
        assert!(ctx.is_cancelled());
        match ctx.take_error() {
            Some(CheckError::Scan { message }) => assert_eq!(message, "first"),
            other => panic!("unexpected error cell: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_marker_does_not_mask_cause() {
        let ctx = RoundContext::new();
        ctx.fail(CheckError::Cancelled);
        assert!(ctx.is_cancelled());
        assert!(ctx.take_error().is_none());
    }

    #[test]
    fn test_send_aborts_on_cancel() {
        let ctx = RoundContext::new();
        let (tx, _rx) = bounded::<u32>(1);
        tx.send(1).unwrap(); // fill the channel
        ctx.cancel();
        assert!(matches!(ctx.send(&tx, 2), Err(CheckError::Cancelled)));
    }
}
