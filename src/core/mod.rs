//! Core types: tasks and errors

mod error;
mod task;

pub use error::{PoolError, Result};
pub use task::{BoxedTask, ClosureTask, Task};

pub(crate) use task::{next_task_id, panic_message, CallTask, SharedTask};
