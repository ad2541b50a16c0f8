//! Worker pool: claims queued tasks from the store and executes them.
//!
//! - [`pool`]: spawns and supervises N worker loops per domain, monitors
//!   worker liveness, resolves orphaned tasks
//! - [`runner`]: the per-worker claim/execute loop and body supervision
//!   (heartbeats, cooperative abort, grace-period forceful termination)
//! - [`sandbox`]: the [`TaskContext`](sandbox::TaskContext) handed to
//!   task bodies
//!
//! # Execution Flow
//!
//! 1. A worker loop polls [`Store::claim_next`](crate::store::Store::claim_next)
//! 2. The claimed record's body runs as its own supervised task under a
//!    log-capturing dispatcher
//! 3. The supervisor maps the outcome to `done`/`failed`/`aborted` and
//!    writes it back to the store

pub mod pool;
pub mod runner;
pub mod sandbox;

pub use pool::WorkerPool;
pub use sandbox::TaskContext;
