//! Named in-process pipes.
//!
//! A pipe is a bounded FIFO buffer shared by name across all workers,
//! created on first use. Producers block while the buffer is full and
//! consumers block while it is empty; either side may bound its wait
//! with a timeout. Blocking waits run in short slices so a worker
//! interrupt is observed promptly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use plinth_core::error::CoreError;
use plinth_core::value::ScriptValue;

use crate::engine::InterruptFlag;

/// Items a pipe buffers before `put` blocks.
pub const PIPE_CAPACITY: usize = 99;

/// Granularity of blocking waits between interrupt checks.
const WAIT_SLICE: Duration = Duration::from_millis(25);

#[derive(Clone)]
struct PipeChannel {
    tx: Sender<ScriptValue>,
    rx: Receiver<ScriptValue>,
}

/// All live pipes, keyed by name. The registry keeps both channel ends,
/// so a pipe never disconnects while registered.
#[derive(Default)]
pub struct PipeRegistry {
    pipes: Mutex<HashMap<String, PipeChannel>>,
}

impl PipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffered item count; zero for a pipe nobody has touched yet.
    pub fn len(&self, name: &str) -> usize {
        self.pipes
            .lock()
            .expect("pipe registry lock")
            .get(name)
            .map(|c| c.rx.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.len(name) == 0
    }

    /// Append an item, blocking while the pipe is full. With a timeout the
    /// wait is bounded and expiry is an error; without one it lasts until
    /// space frees or the run is interrupted.
    pub fn put(
        &self,
        name: &str,
        value: ScriptValue,
        timeout: Option<Duration>,
        interrupt: &InterruptFlag,
    ) -> Result<(), CoreError> {
        let channel = self.channel(name);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut value = value;
        loop {
            check_interrupt(interrupt)?;
            let Some(wait) = next_slice(deadline) else {
                return Err(CoreError::execution(
                    None,
                    format!("pipe {name} is full"),
                ));
            };
            match channel.tx.send_timeout(value, wait) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(v)) => value = v,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(CoreError::Internal(format!("pipe {name} is closed")));
                }
            }
        }
    }

    /// Take the oldest item, blocking while the pipe is empty. A bounded
    /// wait that expires yields `Null`.
    pub fn poll(
        &self,
        name: &str,
        timeout: Option<Duration>,
        interrupt: &InterruptFlag,
    ) -> Result<ScriptValue, CoreError> {
        let channel = self.channel(name);
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            check_interrupt(interrupt)?;
            let Some(wait) = next_slice(deadline) else {
                return Ok(ScriptValue::Null);
            };
            match channel.rx.recv_timeout(wait) {
                Ok(value) => return Ok(value),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CoreError::Internal(format!("pipe {name} is closed")));
                }
            }
        }
    }

    /// Take up to `size` items in arrival order. A bounded wait returns
    /// whatever arrived before expiry; an unbounded one blocks until the
    /// batch is complete or the run is interrupted.
    pub fn drain(
        &self,
        name: &str,
        size: usize,
        timeout: Option<Duration>,
        interrupt: &InterruptFlag,
    ) -> Result<Vec<ScriptValue>, CoreError> {
        let channel = self.channel(name);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut items = Vec::with_capacity(size.min(PIPE_CAPACITY));
        while items.len() < size {
            check_interrupt(interrupt)?;
            let Some(wait) = next_slice(deadline) else {
                break;
            };
            match channel.rx.recv_timeout(wait) {
                Ok(value) => items.push(value),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CoreError::Internal(format!("pipe {name} is closed")));
                }
            }
        }
        Ok(items)
    }

    fn channel(&self, name: &str) -> PipeChannel {
        let mut pipes = self.pipes.lock().expect("pipe registry lock");
        pipes
            .entry(name.to_string())
            .or_insert_with(|| {
                let (tx, rx) = bounded(PIPE_CAPACITY);
                PipeChannel { tx, rx }
            })
            .clone()
    }
}

fn check_interrupt(interrupt: &InterruptFlag) -> Result<(), CoreError> {
    match interrupt.take() {
        Some(reason) => Err(CoreError::execution(None, reason)),
        None => Ok(()),
    }
}

/// The next wait slice before `deadline`, or `None` once it has passed.
fn next_slice(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(WAIT_SLICE),
        Some(d) => {
            let now = Instant::now();
            if now >= d {
                None
            } else {
                Some(WAIT_SLICE.min(d - now))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
