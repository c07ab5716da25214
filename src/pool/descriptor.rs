//! Pool descriptor: the read-mostly record published to the registry.

use crate::pool::config::PoolOptions;
use crate::pool::worker::WorkerRef;
use crate::queue::QueueHandle;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Descriptor of a running pool.
///
/// The descriptor is published once at pool start and shared by every
/// dispatch caller; only the round-robin cursor mutates afterwards. Worker
/// indices are 1-based throughout, matching the cursor's `[1, size]` range.
pub struct PoolDescriptor {
    name: String,
    size: usize,
    next: AtomicUsize,
    workers: Arc<[WorkerRef]>,
    options: PoolOptions,
    queue: QueueHandle,
    born: SystemTime,
    supervisor_alive: Arc<AtomicBool>,
}

impl PoolDescriptor {
    pub(crate) fn new(
        name: String,
        workers: Arc<[WorkerRef]>,
        options: PoolOptions,
        queue: QueueHandle,
        born: SystemTime,
        supervisor_alive: Arc<AtomicBool>,
    ) -> Self {
        let size = workers.len();
        Self {
            name,
            size,
            next: AtomicUsize::new(1),
            workers,
            options,
            queue,
            born,
            supervisor_alive,
        }
    }

    /// Name of the pool
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker units; fixed for the pool's lifetime
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current value of the round-robin cursor, in `[1, size]`
    pub fn next_index(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }

    /// Worker identifier at position `n` (1-based, wrapping), for custom
    /// strategy functions
    pub fn next(&self, n: usize) -> &str {
        let index = if n == 0 { 1 } else { ((n - 1) % self.size) + 1 };
        self.workers[index - 1].name()
    }

    /// Identifiers of all workers in table order
    pub fn worker_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name().to_string()).collect()
    }

    /// When the pool was started
    pub fn born(&self) -> SystemTime {
        self.born
    }

    /// Normalized options the pool was started with
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Advances the round-robin cursor and returns the index it held.
    ///
    /// A single compare-and-swap attempt: losing the race is acceptable
    /// because any fresh value is still a valid distribution, and never
    /// blocking matters more than a perfect rotation under contention.
    pub(crate) fn advance_cursor(&self) -> usize {
        let current = self.next.load(Ordering::Relaxed);
        let next = (current % self.size) + 1;
        let _ = self
            .next
            .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed);
        current
    }

    pub(crate) fn worker(&self, index: usize) -> &WorkerRef {
        &self.workers[index - 1]
    }

    pub(crate) fn workers(&self) -> &Arc<[WorkerRef]> {
        &self.workers
    }

    pub(crate) fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.supervisor_alive.load(Ordering::Acquire)
    }

    /// Whether this descriptor belongs to the pool incarnation owning the
    /// given liveness flag. Guards registry removal against a reused name.
    pub(crate) fn is_owned_by(&self, alive: &Arc<AtomicBool>) -> bool {
        Arc::ptr_eq(&self.supervisor_alive, alive)
    }
}

impl fmt::Debug for PoolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolDescriptor")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("next", &self.next_index())
            .field("alive", &self.is_alive())
            .finish()
    }
}
