//! # workpool
//!
//! A supervised worker pool with pluggable dispatch strategies and a
//! queueing engine.
//!
//! ## Features
//!
//! - **Named pools**: a process-wide registry maps pool names to live pools,
//!   so any part of the program can dispatch by name
//! - **Dispatch strategies**: best worker, random, round-robin, hash
//!   stickiness, and queue-managed "first available worker" dispatch
//! - **Queue manager**: buffers overflow when every worker is busy and
//!   matches idle workers to pending work, FIFO or LIFO
//! - **Supervision**: a one-for-all supervisor over the pool's internals and
//!   a one-for-one worker supervisor with bounded restart intensity
//! - **Statistics**: per-pool and per-worker snapshots including mailbox
//!   lengths and in-flight tasks
//! - **Lifecycle callbacks**: optional event manager fanning out
//!   init/worker-up/worker-down notifications
//!
//! ## Quick start
//!
//! ```rust
//! use workpool::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! // Start a named pool
//! let pool = workpool::start_pool("crunchers", PoolConfig::new(4))?;
//!
//! // Fire-and-forget over the round-robin cursor
//! for i in 0..10 {
//!     workpool::execute("crunchers", Strategy::NextWorker, move || {
//!         println!("task {} executing", i);
//!         Ok(())
//!     })?;
//! }
//!
//! // Request/response through the queue manager
//! let sum = workpool::call_available_worker("crunchers", || Ok(2 + 2), Duration::from_secs(1))?;
//! assert_eq!(sum, 4);
//!
//! // Shut down
//! pool.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Pool configuration
//!
//! ```rust
//! use workpool::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! let config = PoolConfig::new(8)
//!     .with_queue_type(QueueType::Lifo)
//!     .with_overrun_warning(Duration::from_secs(5))
//!     .with_pool_sup_shutdown(ShutdownKind::Timeout(Duration::from_secs(1)));
//!
//! let pool = workpool::start_pool("tuned", config)?;
//! # pool.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom tasks
//!
//! ```rust
//! use workpool::prelude::*;
//!
//! struct Greet {
//!     who: String,
//! }
//!
//! impl Task for Greet {
//!     fn run(&mut self) -> Result<()> {
//!         println!("hello, {}", self.who);
//!         Ok(())
//!     }
//!
//!     fn task_type(&self) -> &str {
//!         "Greet"
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! # let pool = workpool::start_pool("greeters", PoolConfig::new(2))?;
//! workpool::cast("greeters", Strategy::RandomWorker, Greet {
//!     who: "world".to_string(),
//! })?;
//! # pool.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Statistics
//!
//! ```rust
//! use workpool::prelude::*;
//!
//! # fn main() -> Result<()> {
//! # let pool = workpool::start_pool("observed", PoolConfig::new(2))?;
//! let stats = workpool::pool_stats("observed")?;
//! println!(
//!     "{}: {} workers, {} queued",
//!     stats.pool, stats.size, stats.total_message_queue_len
//! );
//! # pool.stop()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod dispatch;
pub mod events;
pub mod pool;
pub mod prelude;
pub mod time_checker;

pub(crate) mod queue;

pub use crate::core::{BoxedTask, ClosureTask, PoolError, Result, Task};
pub use dispatch::Strategy;
pub use events::PoolCallbacks;
pub use pool::{
    add_callbacks, all_stats, best_worker, broadcast, call, call_available_worker, cast, cast_to,
    cast_to_available_worker, descriptor, execute, execute_on_available_worker, get_workers,
    hash_worker, next_available_worker, next_worker, pending_task_count, pool_stats,
    random_worker, remove_callbacks, send_request_available_worker, start_pool, stop_pool,
    PendingCall, Pool, PoolConfig, PoolDescriptor, PoolOptions, PoolStats, QueueType,
    ShutdownKind, TaskSnapshot, WorkerSnapshot, WorkerStats,
};
pub use time_checker::{OverrunHandler, OverrunReport};

#[doc(hidden)]
pub use pool::registry::forget_descriptor;
