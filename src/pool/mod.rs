//! Pool lifecycle and name-keyed dispatch operations.
//!
//! A pool is started with [`start_pool`] and addressed by name afterwards:
//! every dispatch function looks the pool up in the process-wide registry.
//! The returned [`Pool`] handle owns the supervisor and stops the pool when
//! dropped.

mod config;
mod descriptor;
pub(crate) mod registry;
mod stats;
pub(crate) mod supervisor;
pub(crate) mod worker;

pub use config::{PoolConfig, PoolOptions, QueueType, ShutdownKind};
pub use descriptor::PoolDescriptor;
pub use stats::{PoolStats, TaskSnapshot, WorkerSnapshot};
pub use worker::WorkerStats;

use crate::core::{CallTask, ClosureTask, PoolError, Result, SharedTask, Task};
use crate::dispatch::{self, Strategy};
use crate::events::{self, CallbackList, PoolCallbacks, PoolEvent};
use crate::queue::QueueHandle;
use crate::pool::registry::PoolShared;
use crate::pool::supervisor::{Control, PoolCore, SupervisorHandle};
use crate::pool::worker::WorkerRef;
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use parking_lot::RwLock;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::error;

/// Handle to a running pool.
///
/// Dropping the handle stops the pool; call [`Pool::stop`] to do it
/// explicitly and wait for the supervisor to wind down.
pub struct Pool {
    name: String,
    supervisor: Option<SupervisorHandle>,
}

/// Start a named pool.
///
/// Children are brought up in a fixed order (time checker, queue manager,
/// event manager when enabled, worker supervisor) and the descriptor is
/// published to the process-wide registry before any dispatch call can see
/// the name.
///
/// # Errors
///
/// Fails with [`PoolError::AlreadyStarted`] when a live pool owns the name
/// and with [`PoolError::InvalidConfig`] when the configuration is invalid.
///
/// # Example
///
/// ```
/// use workpool::prelude::*;
///
/// # fn main() -> workpool::Result<()> {
/// let pool = workpool::start_pool("greeters", PoolConfig::new(4))?;
/// workpool::execute("greeters", Strategy::NextWorker, || {
///     println!("hello from a worker");
///     Ok(())
/// })?;
/// pool.stop()?;
/// # Ok(())
/// # }
/// ```
pub fn start_pool(name: impl Into<String>, config: PoolConfig) -> Result<Pool> {
    let name = name.into();
    config.validate()?;

    let size = config.workers;
    let mut worker_refs = Vec::with_capacity(size);
    let mut worker_receivers = Vec::with_capacity(size);
    for index in 1..=size {
        let (mailbox_tx, mailbox_rx) = unbounded();
        worker_refs.push(WorkerRef::new(
            registry::worker_name(&name, index),
            mailbox_tx,
        ));
        worker_receivers.push(mailbox_rx);
    }
    let workers: Arc<[WorkerRef]> = worker_refs.into();

    let (queue_tx, queue_rx) = unbounded();
    let queue = QueueHandle::new(&name, queue_tx);
    let (time_tx, time_rx) = unbounded();
    let (control_tx, control_rx) = unbounded();
    let (event_tx, event_rx) = if config.enable_callbacks {
        let (tx, rx) = unbounded();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };
    let callbacks: CallbackList = Arc::new(RwLock::new(config.callbacks.clone()));

    let shared = Arc::new(PoolShared {
        name: name.clone(),
        config,
        workers,
        queue,
        callbacks,
        control: control_tx,
        alive: Arc::new(AtomicBool::new(true)),
        born: SystemTime::now(),
    });

    registry::register(Arc::clone(&shared))?;

    // Queued until the event manager starts consuming
    if let Some(tx) = &event_tx {
        let _ = tx.send(PoolEvent::InitStart);
    }

    let core = PoolCore {
        shared: Arc::clone(&shared),
        worker_receivers,
        queue_rx,
        time_rx,
        time_tx,
        event_tx,
        event_rx,
    };
    let supervisor = supervisor::spawn(core, control_rx).map_err(|e| {
        shared
            .alive
            .store(false, std::sync::atomic::Ordering::Release);
        registry::remove_pool(&shared);
        e
    })?;

    Ok(Pool {
        name,
        supervisor: Some(supervisor),
    })
}

/// Signal a pool to stop without waiting for it to wind down.
///
/// The supervisor removes the registry entries as part of its teardown, so
/// the name may remain visible for a brief moment after this returns. Use
/// [`Pool::stop`] to wait for completion.
pub fn stop_pool(name: &str) -> Result<()> {
    let shared = registry::shared(name).ok_or_else(|| PoolError::no_workers(name))?;
    shared
        .control
        .send(Control::Stop)
        .map_err(|_| PoolError::no_workers(name))
}

impl Pool {
    /// Name of the pool
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the pool and wait for the supervisor to wind down
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.control.send(Control::Stop);
            handle
                .thread
                .join()
                .map_err(|_| PoolError::other("pool supervisor panicked during shutdown"))?;
        }
        Ok(())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.supervisor.is_some() {
            if let Err(e) = self.shutdown() {
                error!(pool = %self.name, error = %e, "failed to stop pool during drop");
            }
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("running", &self.supervisor.is_some())
            .finish()
    }
}

fn find(name: &str) -> Result<Arc<PoolDescriptor>> {
    registry::lookup(name).ok_or_else(|| PoolError::no_workers(name))
}

/// The pool's published descriptor, for custom strategy functions.
pub fn descriptor(name: &str) -> Result<Arc<PoolDescriptor>> {
    find(name)
}

/// Worker with the shortest mailbox, probed from a random starting index.
pub fn best_worker(name: &str) -> Result<String> {
    pick(name, Strategy::BestWorker)
}

/// Uniformly random worker.
pub fn random_worker(name: &str) -> Result<String> {
    pick(name, Strategy::RandomWorker)
}

/// Round-robin worker; advances the pool's atomic cursor.
pub fn next_worker(name: &str) -> Result<String> {
    pick(name, Strategy::NextWorker)
}

/// Deterministic worker for `key`: the same key maps to the same worker for
/// as long as the pool keeps its size.
pub fn hash_worker<K: Hash>(name: &str, key: K) -> Result<String> {
    pick(name, Strategy::hash_worker(key))
}

/// First worker that is idle right now.
///
/// # Errors
///
/// Fails with [`PoolError::NoAvailableWorkers`] when every worker is busy.
pub fn next_available_worker(name: &str) -> Result<String> {
    pick(name, Strategy::NextAvailableWorker)
}

fn pick(name: &str, strategy: Strategy) -> Result<String> {
    let descriptor = find(name)?;
    let index = dispatch::select(&descriptor, strategy)?;
    Ok(descriptor.worker(index).name().to_string())
}

/// Fire-and-forget dispatch of a task via the chosen strategy.
pub fn cast<T: Task + 'static>(name: &str, strategy: Strategy, task: T) -> Result<()> {
    match strategy {
        Strategy::AvailableWorker => cast_to_available_worker(name, task),
        direct => {
            let descriptor = find(name)?;
            let index = dispatch::select(&descriptor, direct)?;
            descriptor.worker(index).send(Box::new(task))
        }
    }
}

/// Fire-and-forget dispatch of a closure via the chosen strategy.
pub fn execute<F>(name: &str, strategy: Strategy, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    cast(name, strategy, ClosureTask::new(f))
}

/// Fire-and-forget dispatch to a worker picked by the caller, typically
/// after a custom strategy over [`descriptor`].
pub fn cast_to<T: Task + 'static>(name: &str, worker: &str, task: T) -> Result<()> {
    let descriptor = find(name)?;
    let target = descriptor
        .workers()
        .iter()
        .find(|w| w.name() == worker)
        .ok_or_else(|| {
            PoolError::invalid_request(format!("unknown worker '{worker}' in pool '{name}'"))
        })?;
    target.send(Box::new(task))
}

/// Request/response dispatch via the chosen strategy.
///
/// The timeout bounds the whole interval: time spent in the worker's
/// mailbox plus execution. A worker that is already running the call when
/// the deadline passes finishes it; the reply is discarded.
pub fn call<R, F>(name: &str, strategy: Strategy, f: F, timeout: Duration) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    match strategy {
        Strategy::AvailableWorker => call_available_worker(name, f, timeout),
        direct => {
            let descriptor = find(name)?;
            let index = dispatch::select(&descriptor, direct)?;
            let deadline = Instant::now() + timeout;
            let (reply_tx, reply_rx) = bounded(1);
            descriptor
                .worker(index)
                .send(Box::new(CallTask::new(f, reply_tx)))?;
            await_reply(reply_rx, deadline, timeout)
        }
    }
}

/// Request/response dispatch through the queue manager.
///
/// When a worker is idle the call is handed over immediately; otherwise it
/// is buffered with a deadline. The timeout bounds queueing plus execution.
/// An expired call is reaped before dispatch, so a worker never executes a
/// call whose deadline has already passed.
///
/// # Errors
///
/// [`PoolError::Timeout`] when the deadline elapses, [`PoolError::NoWorkers`]
/// when the pool is absent, [`PoolError::Noproc`] when the queue manager is
/// down.
///
/// # Example
///
/// ```
/// use workpool::prelude::*;
/// use std::time::Duration;
///
/// # fn main() -> workpool::Result<()> {
/// let pool = workpool::start_pool("adders", PoolConfig::new(2))?;
/// let sum = workpool::call_available_worker("adders", || Ok(2 + 2), Duration::from_secs(1))?;
/// assert_eq!(sum, 4);
/// pool.stop()?;
/// # Ok(())
/// # }
/// ```
pub fn call_available_worker<R, F>(name: &str, f: F, timeout: Duration) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    let (reply_rx, deadline) = submit_queued_call(name, f, timeout)?;
    await_reply(reply_rx, deadline, timeout)
}

/// Non-blocking variant of [`call_available_worker`]: returns a
/// [`PendingCall`] handle immediately.
///
/// The timeout bounds queueing only. Once the call has been handed to a
/// worker, execution takes as long as it takes; wait for the reply via
/// [`PendingCall::wait`] or [`PendingCall::wait_for`].
pub fn send_request_available_worker<R, F>(
    name: &str,
    f: F,
    timeout: Duration,
) -> Result<PendingCall<R>>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    let (reply_rx, _deadline) = submit_queued_call(name, f, timeout)?;
    Ok(PendingCall { rx: reply_rx })
}

fn submit_queued_call<R, F>(
    name: &str,
    f: F,
    timeout: Duration,
) -> Result<(Receiver<Result<R>>, Instant)>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    let descriptor = find(name)?;
    if !descriptor.queue().is_alive() {
        return Err(PoolError::noproc(name));
    }
    let deadline = Instant::now() + timeout;
    let (reply_tx, reply_rx) = bounded(1);
    let timeout_tx = reply_tx.clone();
    descriptor.queue().call(
        Box::new(CallTask::new(f, reply_tx)),
        deadline,
        Box::new(move || {
            let _ = timeout_tx.send(Err(PoolError::timeout(timeout)));
        }),
    )?;
    Ok((reply_rx, deadline))
}

fn await_reply<R>(rx: Receiver<Result<R>>, deadline: Instant, timeout: Duration) -> Result<R> {
    match rx.recv_deadline(deadline) {
        Ok(reply) => reply,
        Err(RecvTimeoutError::Timeout) => Err(PoolError::timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => {
            Err(PoolError::task_failure("worker dropped the request"))
        }
    }
}

/// A reply that has not arrived yet, produced by
/// [`send_request_available_worker`].
pub struct PendingCall<R> {
    rx: Receiver<Result<R>>,
}

impl<R> PendingCall<R> {
    /// Block until the reply arrives.
    pub fn wait(self) -> Result<R> {
        match self.rx.recv() {
            Ok(reply) => reply,
            Err(_) => Err(PoolError::task_failure("worker dropped the request")),
        }
    }

    /// Block until the reply arrives or `timeout` elapses.
    pub fn wait_for(self, timeout: Duration) -> Result<R> {
        await_reply(self.rx, Instant::now() + timeout, timeout)
    }

    /// The reply if it already arrived; does not block.
    pub fn try_wait(&self) -> Option<Result<R>> {
        self.rx.try_recv().ok()
    }
}

impl<R> fmt::Debug for PendingCall<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("replied", &!self.rx.is_empty())
            .finish()
    }
}

/// Fire-and-forget dispatch through the queue manager: the task is buffered
/// until some worker is free. Never blocks the caller.
pub fn cast_to_available_worker<T: Task + 'static>(name: &str, task: T) -> Result<()> {
    let descriptor = find(name)?;
    descriptor.queue().cast(Box::new(task))
}

/// Fire-and-forget dispatch of a closure through the queue manager.
pub fn execute_on_available_worker<F>(name: &str, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    cast_to_available_worker(name, ClosureTask::new(f))
}

/// Run a closure on every worker of the pool. Workers whose thread is gone
/// are silently skipped; the call succeeds regardless.
pub fn broadcast<F>(name: &str, f: F) -> Result<()>
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
{
    let descriptor = find(name)?;
    let shared_f = Arc::new(f);
    for worker in descriptor.workers().iter() {
        if !worker.is_alive() {
            continue;
        }
        let _ = worker.try_deliver(Box::new(SharedTask::new(Arc::clone(&shared_f))));
    }
    Ok(())
}

/// Identifiers of the pool's workers in table order.
pub fn get_workers(name: &str) -> Result<Vec<String>> {
    Ok(find(name)?.worker_names())
}

/// Number of tasks buffered in the pool's queue manager.
pub fn pending_task_count(name: &str) -> Result<usize> {
    Ok(find(name)?.queue().pending_count())
}

/// Point-in-time statistics for one pool.
pub fn pool_stats(name: &str) -> Result<PoolStats> {
    Ok(stats::collect(&*find(name)?))
}

/// Point-in-time statistics for every registered pool.
pub fn all_stats() -> Vec<PoolStats> {
    registry::pool_names()
        .into_iter()
        .filter_map(|name| registry::lookup(&name))
        .map(|descriptor| stats::collect(&descriptor))
        .collect()
}

/// Register a callback module with a pool. Idempotent with respect to `Arc`
/// identity.
///
/// # Errors
///
/// Fails with [`PoolError::CallbacksDisabled`] when the pool was started
/// without `enable_callbacks`.
pub fn add_callbacks(name: &str, callbacks: Arc<dyn PoolCallbacks>) -> Result<()> {
    let shared = registry::shared(name).ok_or_else(|| PoolError::no_workers(name))?;
    if !shared.config.enable_callbacks {
        return Err(PoolError::callbacks_disabled(name));
    }
    events::add_callbacks(&shared.callbacks, callbacks);
    Ok(())
}

/// Remove a previously registered callback module. Idempotent: removing a
/// module that is not registered is a no-op.
pub fn remove_callbacks(name: &str, callbacks: &Arc<dyn PoolCallbacks>) -> Result<()> {
    let shared = registry::shared(name).ok_or_else(|| PoolError::no_workers(name))?;
    if !shared.config.enable_callbacks {
        return Err(PoolError::callbacks_disabled(name));
    }
    events::remove_callbacks(&shared.callbacks, callbacks);
    Ok(())
}
