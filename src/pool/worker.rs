//! Worker unit implementation

use crate::core::{next_task_id, panic_message, BoxedTask, PoolError, Result};
use crate::pool::supervisor::DeathWatch;
use crate::queue::QueueRequest;
use crate::time_checker::TimeEvent;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Counters a worker unit accumulates over its lifetime.
///
/// Shared between the worker thread (writer) and the stats collector
/// (reader); survives worker restarts along with the rest of the worker
/// table entry.
#[derive(Debug, Default)]
pub struct WorkerStats {
    tasks_processed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_panicked: AtomicU64,
    busy_time_us: AtomicU64,
}

impl WorkerStats {
    /// Create new worker statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task that completed successfully
    pub fn record_success(&self, elapsed: Duration) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
        self.record_busy(elapsed);
    }

    /// Record a task that returned an error
    pub fn record_failure(&self, elapsed: Duration) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.record_busy(elapsed);
    }

    /// Record a task that panicked
    pub fn record_panic(&self, elapsed: Duration) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
        self.record_busy(elapsed);
    }

    fn record_busy(&self, elapsed: Duration) {
        self.busy_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Number of tasks completed successfully
    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }

    /// Number of tasks that returned an error
    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    /// Number of tasks that panicked
    pub fn tasks_panicked(&self) -> u64 {
        self.tasks_panicked.load(Ordering::Relaxed)
    }

    /// Total wall-clock time this worker has spent executing tasks
    pub fn busy_time(&self) -> Duration {
        Duration::from_micros(self.busy_time_us.load(Ordering::Relaxed))
    }

    /// Average execution time over every task that ran, whatever its outcome
    pub fn average_task_time(&self) -> Duration {
        let ran = self.tasks_processed() + self.tasks_failed() + self.tasks_panicked();
        if ran == 0 {
            Duration::ZERO
        } else {
            self.busy_time() / ran as u32
        }
    }
}

/// The task a worker is executing right now
#[derive(Clone, Debug)]
pub(crate) struct CurrentTask {
    /// Matches the id reported to the time checker
    #[allow(dead_code)]
    pub task_id: u64,
    pub started: Instant,
    pub desc: String,
}

/// An entry of a pool's immutable worker table.
///
/// The mailbox sender, current-task marker, liveness flag, and statistics
/// all outlive individual worker thread incarnations, so the table stays
/// valid across restarts.
pub(crate) struct WorkerRef {
    name: String,
    mailbox: Sender<BoxedTask>,
    current: Arc<Mutex<Option<CurrentTask>>>,
    alive: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
}

impl WorkerRef {
    pub(crate) fn new(name: String, mailbox: Sender<BoxedTask>) -> Self {
        Self {
            name,
            mailbox,
            current: Arc::new(Mutex::new(None)),
            alive: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(WorkerStats::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn send(&self, task: BoxedTask) -> Result<()> {
        self.mailbox
            .send(task)
            .map_err(|_| PoolError::other(format!("mailbox of worker '{}' is closed", self.name)))
    }

    /// Like [`send`](Self::send), but hands the task back on failure so the
    /// caller can re-buffer it.
    pub(crate) fn try_deliver(&self, task: BoxedTask) -> std::result::Result<(), BoxedTask> {
        self.mailbox.send(task).map_err(|e| e.0)
    }

    pub(crate) fn mailbox_len(&self) -> usize {
        self.mailbox.len()
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// A worker is available when it is alive, its mailbox is empty, and no
    /// task is marked in progress. The marker read is opportunistic; a locked
    /// marker reads as busy.
    pub(crate) fn is_available(&self) -> bool {
        self.is_alive()
            && self.mailbox.is_empty()
            && self
                .current
                .try_lock()
                .map(|guard| guard.is_none())
                .unwrap_or(false)
    }

    /// Opportunistic snapshot of the in-progress task. A locked marker reads
    /// as "no task".
    pub(crate) fn current_task(&self) -> Option<CurrentTask> {
        self.current.try_lock().and_then(|guard| guard.clone())
    }

    pub(crate) fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    pub(crate) fn current_slot(&self) -> Arc<Mutex<Option<CurrentTask>>> {
        Arc::clone(&self.current)
    }

    pub(crate) fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }
}

impl fmt::Debug for WorkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRef")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .field("mailbox_len", &self.mailbox_len())
            .finish()
    }
}

/// Everything a worker thread needs to run one incarnation.
pub(crate) struct WorkerContext {
    pub index: usize,
    pub name: String,
    pub mailbox: Receiver<BoxedTask>,
    pub current: Arc<Mutex<Option<CurrentTask>>>,
    pub alive: Arc<AtomicBool>,
    pub stats: Arc<WorkerStats>,
    pub queue_tx: Sender<QueueRequest>,
    pub time_tx: Sender<TimeEvent>,
    pub poll_interval: Duration,
    pub stop: Arc<AtomicBool>,
}

/// A single worker thread consuming its own FIFO mailbox
#[derive(Debug)]
pub(crate) struct WorkerUnit {
    name: String,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerUnit {
    /// Spawn a worker thread. The `watch` guard reports the thread's exit to
    /// the worker supervisor.
    pub(crate) fn spawn(ctx: WorkerContext, watch: DeathWatch) -> Result<Self> {
        let name = ctx.name.clone();
        let thread_name = name.clone();

        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let _watch = watch;
                Self::run(ctx);
            })
            .map_err(|e| {
                let message = e.to_string();
                PoolError::spawn_with_source(name.as_str(), message, e)
            })?;

        Ok(Self {
            name,
            thread: Some(thread),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Main worker loop.
    ///
    /// The unit advertises itself to the queue manager on start and after
    /// every task, and exits when its stop flag is set or the mailbox is
    /// disconnected.
    fn run(ctx: WorkerContext) {
        ctx.alive.store(true, Ordering::Release);
        let _ = ctx.queue_tx.send(QueueRequest::WorkerReady(ctx.index));
        debug!(worker = %ctx.name, "worker started");

        loop {
            if ctx.stop.load(Ordering::Acquire) {
                break;
            }
            match ctx.mailbox.recv_timeout(ctx.poll_interval) {
                Ok(mut task) => {
                    Self::execute(&ctx, &mut task);
                    let _ = ctx.queue_tx.send(QueueRequest::WorkerReady(ctx.index));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        ctx.alive.store(false, Ordering::Release);
        debug!(
            worker = %ctx.name,
            tasks_processed = ctx.stats.tasks_processed(),
            "worker stopped"
        );
    }

    /// Execute a single task with panic protection
    fn execute(ctx: &WorkerContext, task: &mut BoxedTask) {
        let task_id = next_task_id();
        let started = Instant::now();
        let desc = task.task_type().to_string();

        *ctx.current.lock() = Some(CurrentTask {
            task_id,
            started,
            desc: desc.clone(),
        });
        let _ = ctx.time_tx.send(TimeEvent::Started {
            task_id,
            worker: ctx.name.clone(),
            desc,
            at: started,
        });

        let outcome = catch_unwind(AssertUnwindSafe(|| task.run()));

        let _ = ctx.time_tx.send(TimeEvent::Finished { task_id });
        *ctx.current.lock() = None;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(())) => {
                ctx.stats.record_success(elapsed);
            }
            Ok(Err(e)) => {
                warn!(worker = %ctx.name, error = %e, "task failed");
                ctx.stats.record_failure(elapsed);
            }
            Err(payload) => {
                error!(
                    worker = %ctx.name,
                    panic = %panic_message(payload),
                    "task panicked"
                );
                ctx.stats.record_panic(elapsed);
            }
        }
    }

    /// Leave the thread running; used for brutal shutdown.
    pub(crate) fn detach(mut self) {
        self.thread.take();
    }

    /// Join the worker thread, waiting indefinitely.
    pub(crate) fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(worker = %self.name, "worker panicked during shutdown");
            }
        }
    }

    /// Join the worker thread, giving up at `deadline`. Returns false when
    /// the thread had to be detached.
    pub(crate) fn join_deadline(mut self, deadline: Instant) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };

        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    worker = %self.name,
                    "worker did not stop within shutdown timeout; detaching"
                );
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }

        if thread.join().is_err() {
            error!(worker = %self.name, "worker panicked during shutdown");
        }
        true
    }
}
