use std::sync::Arc;

use plinth_db::DbPool;
use plinth_runtime::cache::ProcessCache;
use plinth_runtime::pool::WorkerPool;
use plinth_runtime::scheduler::Scheduler;

use crate::config::ServerConfig;

/// Shared application state injected into all handlers.
///
/// Cloning is cheap: every field is either a handle or an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Registry database pool.
    pub db: DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Script worker pool.
    pub workers: WorkerPool,
    /// Routes, compiled programs and daemon/crontab registries.
    pub cache: Arc<ProcessCache>,
    /// Daemon and crontab lifecycle.
    pub scheduler: Arc<Scheduler>,
}
