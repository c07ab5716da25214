//! Task trait and related types

use crate::core::error::{PoolError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Generates a unique task ID
pub(crate) fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Extracts a printable message from a panic payload
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// A trait representing a unit of work to be executed by a pool worker
pub trait Task: Send {
    /// Execute the task
    ///
    /// # Errors
    ///
    /// Returns an error if the task execution fails
    fn run(&mut self) -> Result<()>;

    /// Get the task's type name for debugging and statistics
    fn task_type(&self) -> &str {
        "Task"
    }
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.task_type())
    }
}

/// A boxed task that can be sent across threads
pub type BoxedTask = Box<dyn Task>;

/// Helper to create a task from a closure
pub struct ClosureTask<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    closure: Option<F>,
    name: String,
}

impl<F> ClosureTask<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    /// Create a new closure task
    pub fn new(closure: F) -> Self {
        Self {
            closure: Some(closure),
            name: "ClosureTask".to_string(),
        }
    }

    /// Create a new closure task with a custom name
    pub fn with_name<S: Into<String>>(closure: F, name: S) -> Self {
        Self {
            closure: Some(closure),
            name: name.into(),
        }
    }
}

impl<F> Task for ClosureTask<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    fn run(&mut self) -> Result<()> {
        if let Some(closure) = self.closure.take() {
            closure()
        } else {
            // Closure already executed, return error instead of silently succeeding
            Err(PoolError::other(
                "ClosureTask already executed - cannot execute twice",
            ))
        }
    }

    fn task_type(&self) -> &str {
        &self.name
    }
}

/// A request/response task carrying its reply channel.
///
/// The reply is delivered through the captured sender, which keeps the
/// worker-side plumbing fully type-erased.
pub(crate) struct CallTask<F, R>
where
    F: FnOnce() -> Result<R> + Send,
    R: Send,
{
    closure: Option<F>,
    reply: crossbeam::channel::Sender<Result<R>>,
    name: String,
}

impl<F, R> CallTask<F, R>
where
    F: FnOnce() -> Result<R> + Send,
    R: Send,
{
    pub(crate) fn new(closure: F, reply: crossbeam::channel::Sender<Result<R>>) -> Self {
        Self {
            closure: Some(closure),
            reply,
            name: "CallTask".to_string(),
        }
    }
}

impl<F, R> Task for CallTask<F, R>
where
    F: FnOnce() -> Result<R> + Send,
    R: Send,
{
    fn run(&mut self) -> Result<()> {
        let Some(closure) = self.closure.take() else {
            return Err(PoolError::other(
                "CallTask already executed - cannot execute twice",
            ));
        };
        match closure() {
            Ok(value) => {
                // A dropped receiver means the caller gave up waiting; the
                // reply is discarded.
                let _ = self.reply.send(Ok(value));
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                let _ = self.reply.send(Err(e));
                Err(PoolError::task_failure(reason))
            }
        }
    }

    fn task_type(&self) -> &str {
        &self.name
    }
}

/// A task sharing one closure across several workers, used by broadcast.
pub(crate) struct SharedTask<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    closure: Arc<F>,
}

impl<F> SharedTask<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    pub(crate) fn new(closure: Arc<F>) -> Self {
        Self { closure }
    }
}

impl<F> Task for SharedTask<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    fn run(&mut self) -> Result<()> {
        (self.closure)()
    }

    fn task_type(&self) -> &str {
        "SharedTask"
    }
}
