//! Fixed-size worker pool.
//!
//! Capacity is a semaphore with one permit per worker. `acquire` parks
//! the caller until a permit frees; `try_acquire` fails fast for
//! callers that must not queue. The permit rides inside the lease, so
//! returning the worker and freeing the slot happen on drop no matter
//! how the holder exits, including a panic while the lease is held.

use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use plinth_core::error::CoreError;

use crate::engine::EngineServices;
use crate::worker::Worker;

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    size: usize,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<Worker>>,
    services: EngineServices,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize, services: EngineServices) -> WorkerPool {
        let size = size.max(1);
        let idle = (0..size)
            .map(|slot| Worker::spawn(slot, services.clone()))
            .collect();
        WorkerPool {
            inner: Arc::new(PoolInner {
                size,
                semaphore: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(idle),
                services,
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Permits not currently leased.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Wait for a worker. Waiters are served as permits free up.
    pub async fn acquire(&self) -> PooledWorker {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore never closes");
        self.lease(permit)
    }

    /// Take a worker only if one is idle right now.
    pub fn try_acquire(&self) -> Result<PooledWorker, CoreError> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| CoreError::PoolExhausted)?;
        Ok(self.lease(permit))
    }

    fn lease(&self, permit: OwnedSemaphorePermit) -> PooledWorker {
        let worker = self
            .inner
            .idle
            .lock()
            .expect("worker pool lock")
            .pop()
            .expect("a permit always has an idle worker behind it");
        PooledWorker {
            worker: Some(worker),
            pool: self.inner.clone(),
            _permit: permit,
        }
    }
}

impl PoolInner {
    /// Reset the worker and put it back on the idle list, replacing it
    /// with a fresh one when its thread died.
    fn recycle(&self, worker: Worker) {
        let worker = if worker.is_alive() && worker.reset() {
            worker
        } else {
            tracing::warn!(worker = worker.slot(), "worker thread lost, respawning");
            Worker::spawn(worker.slot(), self.services.clone())
        };
        self.idle.lock().expect("worker pool lock").push(worker);
    }
}

/// An exclusive worker lease.
pub struct PooledWorker {
    worker: Option<Worker>,
    pool: Arc<PoolInner>,
    // Declared last: the permit must release only after `drop` has put
    // the worker back, so the next acquirer always finds one idle.
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledWorker {
    type Target = Worker;

    fn deref(&self) -> &Worker {
        self.worker.as_ref().expect("worker present until drop")
    }
}

impl std::fmt::Debug for PooledWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledWorker")
            .field("slot", &self.worker.as_ref().map(Worker::slot))
            .finish_non_exhaustive()
    }
}

impl Drop for PooledWorker {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.recycle(worker);
        }
    }
}
