//! Run supervision: deadlines, client cancellation, and the completion
//! gate that keeps the two from racing each other or a finished run.
//!
//! A run is guarded by two watchers, a deadline timer and a
//! cancellation token. Whichever trips first delivers exactly one
//! interrupt to the worker; the other is disarmed, and nothing fires
//! once the run has completed. The carried reason tells the caller (and
//! the script's error envelope) why the run died.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use plinth_core::value::ScriptValue;

use crate::pool::PooledWorker;
use crate::worker::RunOutcome;

/// Interrupt reason when a run outlives its deadline.
pub const TIMEOUT_REASON: &str = "service executed timeout";
/// Interrupt reason when the client goes away mid-run.
pub const CANCEL_REASON: &str = "client cancelled";

const RUNNING: u8 = 0;
const INTERRUPTED: u8 = 1;
const COMPLETED: u8 = 2;

/// One-shot arbitration between run completion and its watchers.
pub struct RunGate(AtomicU8);

impl RunGate {
    pub fn new() -> Self {
        RunGate(AtomicU8::new(RUNNING))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire) == RUNNING
    }

    /// Claim the right to interrupt. Only the first claimant on a still
    /// running gate wins; later watchers and anything after completion
    /// are refused.
    pub fn try_interrupt(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, INTERRUPTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn complete(&self) {
        self.0.store(COMPLETED, Ordering::Release);
    }
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a cached entry on the leased worker under watch. The lease is
/// consumed; the worker goes back to the pool when this returns.
pub async fn execute(
    worker: PooledWorker,
    entry: &str,
    args: ScriptValue,
    timeout: Duration,
    cancel: CancellationToken,
) -> RunOutcome {
    let run = worker.run(entry, args);
    supervise(&worker, run, entry, timeout, cancel).await
}

/// [`execute`] for ad-hoc scripts.
pub async fn evaluate(
    worker: PooledWorker,
    script: &str,
    timeout: Duration,
    cancel: CancellationToken,
) -> RunOutcome {
    let run = worker.eval(script);
    supervise(&worker, run, "eval", timeout, cancel).await
}

async fn supervise<F>(
    worker: &PooledWorker,
    run: F,
    label: &str,
    timeout: Duration,
    cancel: CancellationToken,
) -> RunOutcome
where
    F: std::future::Future<Output = RunOutcome>,
{
    let gate = RunGate::new();
    tokio::pin!(run);
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            _ = &mut deadline, if gate.is_running() => {
                if gate.try_interrupt() {
                    tracing::warn!(entry = label, "run exceeded its deadline, interrupting");
                    worker.interrupt(TIMEOUT_REASON);
                }
            }
            _ = cancel.cancelled(), if gate.is_running() => {
                if gate.try_interrupt() {
                    tracing::debug!(entry = label, "client went away, interrupting");
                    worker.interrupt(CANCEL_REASON);
                }
            }
        }
    };
    gate.complete();
    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
