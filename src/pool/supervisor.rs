//! Supervised lifecycle of a pool's constituent threads.
//!
//! The pool supervisor starts its children in a fixed order (time checker,
//! queue manager, event manager when enabled, worker supervisor) and applies
//! a one-for-all restart policy: any child crash stops and respawns the
//! whole set. The worker supervisor applies one-for-one semantics over the
//! worker units, so a single worker crash does not disturb its peers. Both
//! levels bound restarts with an intensity counter over a sliding window;
//! exceeding the window tears the pool down.

use crate::core::{BoxedTask, PoolError, Result};
use crate::events::{self, EventManagerContext, PoolEvent};
use crate::pool::config::ShutdownKind;
use crate::pool::registry::{self, PoolShared};
use crate::pool::worker::{WorkerContext, WorkerUnit};
use crate::queue::{self, QueueManagerContext, QueueRequest};
use crate::time_checker::{self, TimeCheckerContext, TimeEvent};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use crossbeam::select;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const SUP_POLL: Duration = Duration::from_millis(50);

const CHILD_TIME: usize = 0;
const CHILD_QUEUE: usize = 1;
const CHILD_EVENTS: usize = 2;
const CHILD_WORKER_SUP: usize = 3;

const MODE_RUN: u8 = 0;
const MODE_STOP: u8 = 1;
const MODE_DRAIN: u8 = 2;

/// How a thread under supervision ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExitReason {
    Normal,
    Panic,
}

/// Drop guard that reports a thread's exit to its supervisor. Reports a
/// panic when the thread is unwinding, a normal exit otherwise.
pub(crate) struct DeathWatch {
    tx: Sender<(usize, ExitReason)>,
    id: usize,
}

impl DeathWatch {
    pub(crate) fn new(tx: Sender<(usize, ExitReason)>, id: usize) -> Self {
        Self { tx, id }
    }
}

impl Drop for DeathWatch {
    fn drop(&mut self) {
        let reason = if thread::panicking() {
            ExitReason::Panic
        } else {
            ExitReason::Normal
        };
        let _ = self.tx.send((self.id, reason));
    }
}

/// Counts restarts over a sliding window. `note_restart` returns false once
/// the intensity budget for the window is exhausted.
pub(crate) struct RestartWindow {
    times: VecDeque<Instant>,
    intensity: usize,
    period: Duration,
}

impl RestartWindow {
    pub(crate) fn new(intensity: usize, period: Duration) -> Self {
        Self {
            times: VecDeque::new(),
            intensity,
            period,
        }
    }

    pub(crate) fn note_restart(&mut self, now: Instant) -> bool {
        while let Some(&front) = self.times.front() {
            if now.duration_since(front) > self.period {
                self.times.pop_front();
            } else {
                break;
            }
        }
        self.times.push_back(now);
        self.times.len() <= self.intensity
    }
}

/// Messages accepted by the pool supervisor
pub(crate) enum Control {
    Stop,
}

/// Handle to a running pool supervisor thread
pub(crate) struct SupervisorHandle {
    pub control: Sender<Control>,
    pub thread: thread::JoinHandle<()>,
}

/// Everything the supervisor needs to (re)start the pool's children. The
/// channels are created once at pool init and survive restarts, so worker
/// mailboxes and the published descriptor stay valid across incarnations.
pub(crate) struct PoolCore {
    pub shared: Arc<PoolShared>,
    pub worker_receivers: Vec<Receiver<BoxedTask>>,
    pub queue_rx: Receiver<QueueRequest>,
    pub time_rx: Receiver<TimeEvent>,
    pub time_tx: Sender<TimeEvent>,
    pub event_tx: Option<Sender<PoolEvent>>,
    pub event_rx: Option<Receiver<PoolEvent>>,
}

/// Spawns the pool supervisor thread.
pub(crate) fn spawn(core: PoolCore, control_rx: Receiver<Control>) -> Result<SupervisorHandle> {
    let control_tx = core.shared.control.clone();
    let name = format!("{}-sup", core.shared.name);
    let thread = thread::Builder::new()
        .name(name.clone())
        .spawn(move || run(core, control_rx))
        .map_err(|e| {
            let message = e.to_string();
            PoolError::spawn_with_source(name, message, e)
        })?;

    Ok(SupervisorHandle {
        control: control_tx,
        thread,
    })
}

fn run(core: PoolCore, control_rx: Receiver<Control>) {
    let shared = Arc::clone(&core.shared);
    let (exit_tx, exit_rx) = unbounded();
    let mut window = RestartWindow::new(
        shared.config.pool_sup_intensity,
        shared.config.pool_sup_period,
    );

    let mut children = match start_children(&core, &exit_tx) {
        Ok(children) => children,
        Err(e) => {
            error!(pool = %shared.name, error = %e, "failed to start pool children");
            teardown(&shared);
            return;
        }
    };
    debug!(pool = %shared.name, "pool supervisor started");

    loop {
        select! {
            recv(control_rx) -> _msg => {
                // Stop request, or the last Pool handle was dropped
                stop_children(children, StopStyle::Shutdown);
                teardown(&shared);
                debug!(pool = %shared.name, "pool stopped");
                return;
            }
            recv(exit_rx) -> msg => {
                let Ok((child, reason)) = msg else {
                    teardown(&shared);
                    return;
                };
                if reason == ExitReason::Normal {
                    continue;
                }
                warn!(
                    pool = %shared.name,
                    child = child_name(child),
                    "pool child crashed; restarting all children"
                );
                stop_children(children, StopStyle::Restart);
                if !window.note_restart(Instant::now()) {
                    error!(
                        pool = %shared.name,
                        "restart intensity exceeded; shutting pool down"
                    );
                    teardown(&shared);
                    return;
                }
                // Exits of the incarnation just stopped are no longer relevant
                while exit_rx.try_recv().is_ok() {}
                children = match start_children(&core, &exit_tx) {
                    Ok(children) => children,
                    Err(e) => {
                        error!(pool = %shared.name, error = %e, "failed to restart pool children");
                        teardown(&shared);
                        return;
                    }
                };
            }
        }
    }
}

fn teardown(shared: &Arc<PoolShared>) {
    shared.alive.store(false, Ordering::Release);
    registry::remove_pool(shared);
}

fn child_name(id: usize) -> &'static str {
    match id {
        CHILD_TIME => "time-checker",
        CHILD_QUEUE => "queue-manager",
        CHILD_EVENTS => "event-manager",
        CHILD_WORKER_SUP => "worker-supervisor",
        _ => "unknown",
    }
}

struct Children {
    stop: Arc<AtomicBool>,
    worker_mode: Arc<AtomicU8>,
    time: thread::JoinHandle<()>,
    queue: thread::JoinHandle<()>,
    events: Option<thread::JoinHandle<()>>,
    worker_sup: thread::JoinHandle<()>,
}

enum StopStyle {
    /// Orderly pool shutdown; workers stop per the configured shutdown kind
    Shutdown,
    /// One-for-all restart; everything is joined so the next incarnation
    /// never shares a mailbox with a live predecessor
    Restart,
}

fn stop_children(children: Children, style: StopStyle) {
    children.stop.store(true, Ordering::Release);
    let mode = match style {
        StopStyle::Shutdown => MODE_STOP,
        StopStyle::Restart => MODE_DRAIN,
    };
    children.worker_mode.store(mode, Ordering::Release);

    // Reverse start order
    if children.worker_sup.join().is_err() {
        error!("worker supervisor panicked during stop");
    }
    if let Some(events) = children.events {
        let _ = events.join();
    }
    let _ = children.queue.join();
    let _ = children.time.join();
}

fn start_children(core: &PoolCore, exit_tx: &Sender<(usize, ExitReason)>) -> Result<Children> {
    let stop = Arc::new(AtomicBool::new(false));
    let worker_mode = Arc::new(AtomicU8::new(MODE_RUN));

    let time = spawn_time_checker(core, &stop, exit_tx)?;

    let queue = match spawn_queue_manager(core, &stop, exit_tx) {
        Ok(queue) => queue,
        Err(e) => {
            stop.store(true, Ordering::Release);
            let _ = time.join();
            return Err(e);
        }
    };

    let events = if core.shared.config.enable_callbacks {
        match spawn_event_manager(core, &stop, exit_tx) {
            Ok(events) => Some(events),
            Err(e) => {
                stop.store(true, Ordering::Release);
                let _ = queue.join();
                let _ = time.join();
                return Err(e);
            }
        }
    } else {
        None
    };

    let worker_sup = match spawn_worker_sup(core, &worker_mode, exit_tx) {
        Ok(worker_sup) => worker_sup,
        Err(e) => {
            stop.store(true, Ordering::Release);
            if let Some(events) = events {
                let _ = events.join();
            }
            let _ = queue.join();
            let _ = time.join();
            return Err(e);
        }
    };

    Ok(Children {
        stop,
        worker_mode,
        time,
        queue,
        events,
        worker_sup,
    })
}

fn spawn_child(
    name: String,
    watch: DeathWatch,
    body: impl FnOnce() + Send + 'static,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let _watch = watch;
            body();
        })
        .map_err(|e| {
            let message = e.to_string();
            PoolError::spawn_with_source(name, message, e)
        })
}

fn spawn_time_checker(
    core: &PoolCore,
    stop: &Arc<AtomicBool>,
    exit_tx: &Sender<(usize, ExitReason)>,
) -> Result<thread::JoinHandle<()>> {
    let shared = &core.shared;
    let tick = shared
        .config
        .overrun_warning
        .map(|budget| (budget / 4).max(Duration::from_millis(10)))
        .unwrap_or(shared.config.worker_poll_interval);
    let ctx = TimeCheckerContext {
        pool: shared.name.clone(),
        rx: core.time_rx.clone(),
        warn_after: shared.config.overrun_warning,
        handler: shared.config.overrun_handler.clone(),
        stop: Arc::clone(stop),
        tick,
    };
    spawn_child(
        format!("{}-time-checker", shared.name),
        DeathWatch::new(exit_tx.clone(), CHILD_TIME),
        move || time_checker::run(ctx),
    )
}

fn spawn_queue_manager(
    core: &PoolCore,
    stop: &Arc<AtomicBool>,
    exit_tx: &Sender<(usize, ExitReason)>,
) -> Result<thread::JoinHandle<()>> {
    let shared = &core.shared;
    let ctx = QueueManagerContext {
        pool: shared.name.clone(),
        rx: core.queue_rx.clone(),
        workers: Arc::clone(&shared.workers),
        queue_type: shared.config.queue_type,
        pending_gauge: shared.queue.pending_gauge(),
        alive: shared.queue.alive_flag(),
        stop: Arc::clone(stop),
        poll_interval: shared.config.worker_poll_interval,
    };
    spawn_child(
        format!("{}-queue-manager", shared.name),
        DeathWatch::new(exit_tx.clone(), CHILD_QUEUE),
        move || queue::run(ctx),
    )
}

fn spawn_event_manager(
    core: &PoolCore,
    stop: &Arc<AtomicBool>,
    exit_tx: &Sender<(usize, ExitReason)>,
) -> Result<thread::JoinHandle<()>> {
    let shared = &core.shared;
    let rx = core
        .event_rx
        .as_ref()
        .ok_or_else(|| PoolError::other("event manager enabled without an event channel"))?
        .clone();
    let ctx = EventManagerContext {
        pool: shared.name.clone(),
        rx,
        callbacks: Arc::clone(&shared.callbacks),
        stop: Arc::clone(stop),
        poll_interval: shared.config.worker_poll_interval,
    };
    spawn_child(
        format!("{}-event-manager", shared.name),
        DeathWatch::new(exit_tx.clone(), CHILD_EVENTS),
        move || events::run(ctx),
    )
}

struct WorkerSupContext {
    shared: Arc<PoolShared>,
    receivers: Vec<Receiver<BoxedTask>>,
    time_tx: Sender<TimeEvent>,
    event_tx: Option<Sender<PoolEvent>>,
    mode: Arc<AtomicU8>,
    parent_exit: Sender<(usize, ExitReason)>,
}

fn spawn_worker_sup(
    core: &PoolCore,
    mode: &Arc<AtomicU8>,
    exit_tx: &Sender<(usize, ExitReason)>,
) -> Result<thread::JoinHandle<()>> {
    let ctx = WorkerSupContext {
        shared: Arc::clone(&core.shared),
        receivers: core.worker_receivers.clone(),
        time_tx: core.time_tx.clone(),
        event_tx: core.event_tx.clone(),
        mode: Arc::clone(mode),
        parent_exit: exit_tx.clone(),
    };
    spawn_child(
        format!("{}-worker-sup", core.shared.name),
        DeathWatch::new(exit_tx.clone(), CHILD_WORKER_SUP),
        move || worker_sup_run(ctx),
    )
}

fn emit(event_tx: &Option<Sender<PoolEvent>>, event: PoolEvent) {
    if let Some(tx) = event_tx {
        let _ = tx.send(event);
    }
}

/// One-for-one supervision over the worker units.
fn worker_sup_run(ctx: WorkerSupContext) {
    let size = ctx.shared.workers.len();
    let (worker_exit_tx, worker_exit_rx) = unbounded();
    let worker_stop = Arc::new(AtomicBool::new(false));
    let mut units: Vec<Option<WorkerUnit>> = Vec::with_capacity(size);

    for index in 1..=size {
        match spawn_worker(&ctx, index, &worker_exit_tx, &worker_stop) {
            Ok(unit) => {
                emit(
                    &ctx.event_tx,
                    PoolEvent::NewWorker {
                        worker: unit.name().to_string(),
                    },
                );
                units.push(Some(unit));
            }
            Err(e) => {
                error!(pool = %ctx.shared.name, error = %e, "failed to spawn worker");
                escalate(ctx, units, &worker_stop);
                return;
            }
        }
    }

    let mut window = RestartWindow::new(
        ctx.shared.config.pool_sup_intensity,
        ctx.shared.config.pool_sup_period,
    );

    loop {
        match ctx.mode.load(Ordering::Acquire) {
            MODE_STOP => {
                let kind = ctx.shared.config.pool_sup_shutdown;
                shutdown_workers(units, &worker_stop, kind);
                return;
            }
            MODE_DRAIN => {
                shutdown_workers(units, &worker_stop, ShutdownKind::Infinity);
                return;
            }
            _ => {}
        }

        match worker_exit_rx.recv_timeout(SUP_POLL) {
            Ok((index, ExitReason::Panic)) => {
                let worker = ctx.shared.workers[index - 1].name().to_string();
                warn!(pool = %ctx.shared.name, worker = %worker, "worker crashed");
                emit(
                    &ctx.event_tx,
                    PoolEvent::WorkerDeath {
                        worker: worker.clone(),
                        reason: "panic".to_string(),
                    },
                );

                if !window.note_restart(Instant::now()) {
                    error!(
                        pool = %ctx.shared.name,
                        "worker restart intensity exceeded"
                    );
                    escalate(ctx, units, &worker_stop);
                    return;
                }

                match spawn_worker(&ctx, index, &worker_exit_tx, &worker_stop) {
                    Ok(unit) => {
                        emit(
                            &ctx.event_tx,
                            PoolEvent::NewWorker {
                                worker: unit.name().to_string(),
                            },
                        );
                        units[index - 1] = Some(unit);
                    }
                    Err(e) => {
                        error!(pool = %ctx.shared.name, error = %e, "failed to respawn worker");
                        escalate(ctx, units, &worker_stop);
                        return;
                    }
                }
            }
            Ok((_, ExitReason::Normal)) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Hands the failure to the pool supervisor, which applies one-for-all.
fn escalate(ctx: WorkerSupContext, units: Vec<Option<WorkerUnit>>, worker_stop: &Arc<AtomicBool>) {
    let _ = ctx.parent_exit.send((CHILD_WORKER_SUP, ExitReason::Panic));
    shutdown_workers(units, worker_stop, ShutdownKind::Infinity);
}

fn spawn_worker(
    ctx: &WorkerSupContext,
    index: usize,
    exit_tx: &Sender<(usize, ExitReason)>,
    stop: &Arc<AtomicBool>,
) -> Result<WorkerUnit> {
    let worker = &ctx.shared.workers[index - 1];
    let worker_ctx = WorkerContext {
        index,
        name: worker.name().to_string(),
        mailbox: ctx.receivers[index - 1].clone(),
        current: worker.current_slot(),
        alive: worker.alive_flag(),
        stats: worker.stats(),
        queue_tx: ctx.shared.queue.sender(),
        time_tx: ctx.time_tx.clone(),
        poll_interval: ctx.shared.config.worker_poll_interval,
        stop: Arc::clone(stop),
    };
    WorkerUnit::spawn(worker_ctx, DeathWatch::new(exit_tx.clone(), index))
}

fn shutdown_workers(
    units: Vec<Option<WorkerUnit>>,
    stop: &Arc<AtomicBool>,
    kind: ShutdownKind,
) {
    stop.store(true, Ordering::Release);
    match kind {
        ShutdownKind::Brutal => {
            for unit in units.into_iter().flatten() {
                unit.detach();
            }
        }
        ShutdownKind::Infinity => {
            for unit in units.into_iter().flatten() {
                unit.join();
            }
        }
        ShutdownKind::Timeout(limit) => {
            let deadline = Instant::now() + limit;
            for unit in units.into_iter().flatten() {
                unit.join_deadline(deadline);
            }
        }
    }
}
