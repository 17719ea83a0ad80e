//! Script execution runtime.
//!
//! Hosts a fixed pool of worker threads, each owning a single-threaded
//! script engine with a cooperative event loop. Admin-managed sources
//! (controllers, modules, daemons, crontabs) are compiled on first use
//! and cached; runs are dispatched onto pooled workers with a deadline
//! and client-cancellation guard. Also provides the shared process
//! cache (routes, compiled programs, daemon/crontab registries), the
//! external database bridge and named in-process pipes.

pub mod bridge;
pub mod cache;
pub mod dispatch;
pub mod engine;
pub mod pipe;
pub mod pool;
pub mod program;
pub mod router;
pub mod scheduler;
pub mod worker;
