//! Convenient re-exports for common types and traits

pub use crate::core::{BoxedTask, ClosureTask, PoolError, Result, Task};
pub use crate::dispatch::Strategy;
pub use crate::events::PoolCallbacks;
pub use crate::pool::{
    PendingCall, Pool, PoolConfig, PoolDescriptor, PoolOptions, PoolStats, QueueType,
    ShutdownKind, TaskSnapshot, WorkerSnapshot, WorkerStats,
};
pub use crate::time_checker::{OverrunHandler, OverrunReport};
