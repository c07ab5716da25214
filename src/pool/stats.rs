//! Pool statistics snapshots

use crate::pool::config::PoolOptions;
use crate::pool::descriptor::PoolDescriptor;
use std::time::Duration;

/// The task a worker was executing when the snapshot was taken
#[derive(Clone, Debug)]
pub struct TaskSnapshot {
    /// The task's type name
    pub task: String,
    /// Elapsed wall-clock runtime
    pub runtime: Duration,
}

/// Per-worker entry of a stats snapshot
#[derive(Clone, Debug)]
pub struct WorkerSnapshot {
    /// Worker identifier
    pub name: String,
    /// Number of tasks waiting in the worker's mailbox
    pub message_queue_len: usize,
    /// Total tasks completed successfully
    pub tasks_processed: u64,
    /// Total tasks that returned an error
    pub tasks_failed: u64,
    /// Total tasks that panicked
    pub tasks_panicked: u64,
    /// Total wall-clock time spent executing tasks
    pub busy_time: Duration,
    /// Average execution time over every task that ran
    pub avg_task_time: Duration,
    /// The in-flight task, absent when the worker is idle
    pub current: Option<TaskSnapshot>,
}

/// Point-in-time snapshot of a pool
#[derive(Clone, Debug)]
pub struct PoolStats {
    /// Name of the pool
    pub pool: String,
    /// Identifier of the pool supervisor thread
    pub supervisor: String,
    /// Normalized options the pool runs with
    pub options: PoolOptions,
    /// Number of worker units
    pub size: usize,
    /// Current round-robin cursor value
    pub next_worker: usize,
    /// Sum of all worker mailbox lengths plus the queue manager's buffered
    /// tasks
    pub total_message_queue_len: usize,
    /// Tasks buffered in the queue manager
    pub pending_tasks: usize,
    /// Per-worker entries; workers whose thread is gone are omitted
    pub workers: Vec<WorkerSnapshot>,
}

/// Builds a snapshot from a published descriptor. Marker reads are
/// opportunistic: a worker mutating its marker right now reads as idle.
pub(crate) fn collect(descriptor: &PoolDescriptor) -> PoolStats {
    let pending_tasks = descriptor.queue().pending_count();
    let mut total_message_queue_len = pending_tasks;
    let mut workers = Vec::with_capacity(descriptor.size());

    for worker in descriptor.workers().iter() {
        if !worker.is_alive() {
            continue;
        }
        let message_queue_len = worker.mailbox_len();
        total_message_queue_len += message_queue_len;
        let stats = worker.stats();
        let current = worker.current_task().map(|current| TaskSnapshot {
            task: current.desc,
            runtime: current.started.elapsed(),
        });
        workers.push(WorkerSnapshot {
            name: worker.name().to_string(),
            message_queue_len,
            tasks_processed: stats.tasks_processed(),
            tasks_failed: stats.tasks_failed(),
            tasks_panicked: stats.tasks_panicked(),
            busy_time: stats.busy_time(),
            avg_task_time: stats.average_task_time(),
            current,
        });
    }

    PoolStats {
        pool: descriptor.name().to_string(),
        supervisor: format!("{}-sup", descriptor.name()),
        options: descriptor.options().clone(),
        size: descriptor.size(),
        next_worker: descriptor.next_index(),
        total_message_queue_len,
        pending_tasks,
        workers,
    }
}
