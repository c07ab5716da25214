//! Central queue manager for the available-worker strategies.
//!
//! The queue manager is a long-running thread owning two logical queues:
//! tasks waiting for workers and workers waiting for tasks. All mutations
//! are driven by messages on a single input channel, so no locks are needed
//! around the queues themselves. At any moment at most one of the two queues
//! is non-empty; a new arrival on either side immediately matches the head
//! of the opposite queue.

use crate::core::{BoxedTask, PoolError, Result};
use crate::pool::worker::WorkerRef;
use crate::pool::QueueType;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Notifier invoked when a queued call expires before it could be matched.
pub(crate) type TimeoutNotifier = Box<dyn FnOnce() + Send>;

/// Requests handled by the queue manager thread.
pub(crate) enum QueueRequest {
    /// Fire-and-forget task; queued until a worker is free.
    Cast(BoxedTask),
    /// Request/response task with a matching deadline.
    Call {
        task: BoxedTask,
        deadline: Instant,
        notify_timeout: TimeoutNotifier,
    },
    /// A worker finished its work (or just started) and is idle.
    WorkerReady(usize),
}

/// Cheap, cloneable handle to a pool's queue manager.
#[derive(Clone)]
pub(crate) struct QueueHandle {
    pool: Arc<str>,
    tx: Sender<QueueRequest>,
    alive: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
}

impl QueueHandle {
    pub(crate) fn new(pool: &str, tx: Sender<QueueRequest>) -> Self {
        Self {
            pool: Arc::from(pool),
            tx,
            alive: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn cast(&self, task: BoxedTask) -> Result<()> {
        self.tx
            .send(QueueRequest::Cast(task))
            .map_err(|_| PoolError::noproc(self.pool.as_ref()))
    }

    pub(crate) fn call(
        &self,
        task: BoxedTask,
        deadline: Instant,
        notify_timeout: TimeoutNotifier,
    ) -> Result<()> {
        self.tx
            .send(QueueRequest::Call {
                task,
                deadline,
                notify_timeout,
            })
            .map_err(|_| PoolError::noproc(self.pool.as_ref()))
    }

    pub(crate) fn sender(&self) -> Sender<QueueRequest> {
        self.tx.clone()
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// Number of tasks currently buffered, as a gauge for stats.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub(crate) fn pending_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pending)
    }
}

struct PendingTask {
    task: BoxedTask,
    deadline: Option<Instant>,
    notify_timeout: Option<TimeoutNotifier>,
}

impl PendingTask {
    fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    fn expire(mut self) {
        if let Some(notify) = self.notify_timeout.take() {
            notify();
        }
    }
}

pub(crate) struct QueueManagerContext {
    pub pool: String,
    pub rx: Receiver<QueueRequest>,
    pub workers: Arc<[WorkerRef]>,
    pub queue_type: QueueType,
    pub pending_gauge: Arc<AtomicUsize>,
    pub alive: Arc<AtomicBool>,
    pub stop: Arc<AtomicBool>,
    pub poll_interval: Duration,
}

struct State {
    pending: VecDeque<PendingTask>,
    ready: VecDeque<usize>,
    is_ready: Vec<bool>,
    queue_type: QueueType,
}

/// Main queue manager loop. A restart of this thread resets both queues:
/// buffered tasks are not durable.
pub(crate) fn run(ctx: QueueManagerContext) {
    ctx.pending_gauge.store(0, Ordering::Relaxed);
    ctx.alive.store(true, Ordering::Release);
    debug!(pool = %ctx.pool, "queue manager started");

    let mut state = State {
        pending: VecDeque::new(),
        ready: VecDeque::new(),
        is_ready: vec![false; ctx.workers.len()],
        queue_type: ctx.queue_type,
    };

    loop {
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }
        match ctx.rx.recv_timeout(ctx.poll_interval) {
            Ok(request) => state.handle(request, &ctx),
            Err(RecvTimeoutError::Timeout) => state.reap_expired(&ctx),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Dropping undispatched calls disconnects their reply channels, so any
    // waiting caller observes the failure rather than hanging.
    ctx.pending_gauge.store(0, Ordering::Relaxed);
    ctx.alive.store(false, Ordering::Release);
    debug!(pool = %ctx.pool, "queue manager stopped");
}

impl State {
    fn handle(&mut self, request: QueueRequest, ctx: &QueueManagerContext) {
        match request {
            QueueRequest::WorkerReady(index) => self.worker_ready(index, ctx),
            QueueRequest::Cast(task) => self.dispatch_or_enqueue(
                PendingTask {
                    task,
                    deadline: None,
                    notify_timeout: None,
                },
                ctx,
            ),
            QueueRequest::Call {
                task,
                deadline,
                notify_timeout,
            } => {
                // An already-expired call is dropped without ever touching
                // the queue, so a zero-timeout call leaves no stale entry.
                let pending = PendingTask {
                    task,
                    deadline: Some(deadline),
                    notify_timeout: Some(notify_timeout),
                };
                if pending.expired(Instant::now()) {
                    pending.expire();
                    return;
                }
                self.dispatch_or_enqueue(pending, ctx);
            }
        }
    }

    fn worker_ready(&mut self, index: usize, ctx: &QueueManagerContext) {
        if index == 0 || index > ctx.workers.len() || self.is_ready[index - 1] {
            return;
        }

        // Expired calls are reaped before dispatch; a worker never receives
        // a call whose deadline has passed.
        let now = Instant::now();
        while let Some(mut pending) = self.pop_pending(ctx) {
            if pending.expired(now) {
                pending.expire();
                continue;
            }
            match ctx.workers[index - 1].try_deliver(pending.task) {
                Ok(()) => return,
                Err(task) => {
                    // Closed mailbox means the pool is going down; put the
                    // task back where it was taken from.
                    pending.task = task;
                    self.unpop_pending(pending, ctx);
                    break;
                }
            }
        }

        self.ready.push_back(index);
        self.is_ready[index - 1] = true;
    }

    fn dispatch_or_enqueue(&mut self, mut pending: PendingTask, ctx: &QueueManagerContext) {
        while let Some(index) = self.pop_ready() {
            if !ctx.workers[index - 1].is_alive() {
                // Stale readiness notice; the respawned worker advertises
                // itself again.
                continue;
            }
            match ctx.workers[index - 1].try_deliver(pending.task) {
                Ok(()) => return,
                Err(task) => {
                    pending.task = task;
                    break;
                }
            }
        }

        self.pending.push_back(pending);
        ctx.pending_gauge.fetch_add(1, Ordering::Relaxed);
    }

    fn pop_pending(&mut self, ctx: &QueueManagerContext) -> Option<PendingTask> {
        let pending = match self.queue_type {
            QueueType::Fifo => self.pending.pop_front(),
            QueueType::Lifo => self.pending.pop_back(),
        }?;
        ctx.pending_gauge.fetch_sub(1, Ordering::Relaxed);
        Some(pending)
    }

    /// Re-buffers a task popped by [`pop_pending`](Self::pop_pending) at the
    /// position it was taken from.
    fn unpop_pending(&mut self, pending: PendingTask, ctx: &QueueManagerContext) {
        match self.queue_type {
            QueueType::Fifo => self.pending.push_front(pending),
            QueueType::Lifo => self.pending.push_back(pending),
        }
        ctx.pending_gauge.fetch_add(1, Ordering::Relaxed);
    }

    fn pop_ready(&mut self) -> Option<usize> {
        let index = self.ready.pop_front()?;
        self.is_ready[index - 1] = false;
        Some(index)
    }

    fn reap_expired(&mut self, ctx: &QueueManagerContext) {
        let now = Instant::now();
        if !self.pending.iter().any(|p| p.expired(now)) {
            return;
        }
        let mut kept = VecDeque::with_capacity(self.pending.len());
        while let Some(pending) = self.pending.pop_front() {
            if pending.expired(now) {
                ctx.pending_gauge.fetch_sub(1, Ordering::Relaxed);
                pending.expire();
            } else {
                kept.push_back(pending);
            }
        }
        self.pending = kept;
    }
}
