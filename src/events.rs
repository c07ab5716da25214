//! Lifecycle events and the callback interface.
//!
//! When callbacks are enabled for a pool, a dedicated event-manager thread
//! fans lifecycle events out to every registered [`PoolCallbacks`]
//! implementation. Callback panics are caught and logged so a misbehaving
//! callback cannot take the event manager down.

use crate::core::panic_message;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Receiver of pool lifecycle events.
///
/// Every method has a default no-op implementation, so an implementation may
/// pick any subset of events it cares about.
///
/// # Example
///
/// ```
/// use workpool::PoolCallbacks;
///
/// struct Announcer;
///
/// impl PoolCallbacks for Announcer {
///     fn on_new_worker(&self, pool: &str, worker: &str) {
///         println!("{pool}: worker {worker} is up");
///     }
/// }
/// ```
pub trait PoolCallbacks: Send + Sync {
    /// The pool has begun initialization.
    fn on_init_start(&self, _pool: &str) {}

    /// A worker unit was created (including respawns after a crash).
    fn on_new_worker(&self, _pool: &str, _worker: &str) {}

    /// A worker unit died with the given reason.
    fn on_worker_death(&self, _pool: &str, _worker: &str, _reason: &str) {}
}

/// Lifecycle events delivered to the event manager.
#[derive(Clone, Debug)]
pub(crate) enum PoolEvent {
    InitStart,
    NewWorker { worker: String },
    WorkerDeath { worker: String, reason: String },
}

/// Shared, mutable list of registered callback modules.
pub(crate) type CallbackList = Arc<RwLock<Vec<Arc<dyn PoolCallbacks>>>>;

/// Registers a callback module. Idempotent with respect to `Arc` identity.
pub(crate) fn add_callbacks(list: &CallbackList, callbacks: Arc<dyn PoolCallbacks>) {
    let mut guard = list.write();
    if !guard.iter().any(|c| Arc::ptr_eq(c, &callbacks)) {
        guard.push(callbacks);
    }
}

/// Removes a callback module. Idempotent with respect to `Arc` identity.
pub(crate) fn remove_callbacks(list: &CallbackList, callbacks: &Arc<dyn PoolCallbacks>) {
    list.write().retain(|c| !Arc::ptr_eq(c, callbacks));
}

pub(crate) struct EventManagerContext {
    pub pool: String,
    pub rx: Receiver<PoolEvent>,
    pub callbacks: CallbackList,
    pub stop: Arc<AtomicBool>,
    pub poll_interval: Duration,
}

/// Main event manager loop.
pub(crate) fn run(ctx: EventManagerContext) {
    loop {
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }

        match ctx.rx.recv_timeout(ctx.poll_interval) {
            Ok(event) => dispatch(&ctx, &event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn dispatch(ctx: &EventManagerContext, event: &PoolEvent) {
    let snapshot: Vec<Arc<dyn PoolCallbacks>> = ctx.callbacks.read().clone();
    for callbacks in snapshot {
        let outcome = catch_unwind(AssertUnwindSafe(|| match event {
            PoolEvent::InitStart => callbacks.on_init_start(&ctx.pool),
            PoolEvent::NewWorker { worker } => callbacks.on_new_worker(&ctx.pool, worker),
            PoolEvent::WorkerDeath { worker, reason } => {
                callbacks.on_worker_death(&ctx.pool, worker, reason)
            }
        }));
        if let Err(payload) = outcome {
            error!(
                pool = %ctx.pool,
                panic = %panic_message(payload),
                "pool callback panicked"
            );
        }
    }
}
