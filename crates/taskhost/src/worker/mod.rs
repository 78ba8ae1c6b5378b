//! Worker pools
//!
//! - [`WorkerPool`] - the workers of one task processor
//! - [`PoolResources`] - task, context and queues resolved for a pool
//! - [`MessagePoller`] - lease polling with exponential backoff
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        WorkerPool                        │
//! │   pool token ──┬── worker 0 ──┐                          │
//! │                ├── worker 1 ──┼──▶ MessagePoller         │
//! │                └── worker N ──┘      │ lease             │
//! │                                      ▼                   │
//! │      AnyTask::execute (fresh instance, setup, run)       │
//! │                                      │                   │
//! │         response queue ◀── result ───┤                   │
//! │         request queue  ◀── delete ───┘                   │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod poller;
mod pool;

pub use poller::{MessagePoller, PollerConfig};
pub use pool::{PoolBuildError, PoolResources, WorkerPool, WorkerPoolError, WorkerPoolStatus};
