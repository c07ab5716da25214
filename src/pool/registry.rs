//! Process-wide pool registry.
//!
//! Two maps back the registry: `SUPERVISORS` is the authoritative record of
//! running pools, `DESCRIPTORS` is the read-mostly cache dispatch callers
//! hit. A missing cache entry with a live supervisor is rebuilt on the fly;
//! a cached entry whose supervisor died is invalidated on sight.

use crate::core::{PoolError, Result};
use crate::events::CallbackList;
use crate::pool::config::{PoolConfig, PoolOptions};
use crate::pool::descriptor::PoolDescriptor;
use crate::pool::supervisor::Control;
use crate::pool::worker::WorkerRef;
use crate::queue::QueueHandle;
use crossbeam::channel::Sender;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::warn;

/// Authoritative per-pool record shared between the supervisor and the
/// registry. Lives exactly as long as the pool.
pub(crate) struct PoolShared {
    pub name: String,
    pub config: PoolConfig,
    pub workers: Arc<[WorkerRef]>,
    pub queue: QueueHandle,
    pub callbacks: CallbackList,
    pub control: Sender<Control>,
    pub alive: Arc<AtomicBool>,
    pub born: SystemTime,
}

static SUPERVISORS: Lazy<RwLock<HashMap<String, Arc<PoolShared>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static DESCRIPTORS: Lazy<RwLock<HashMap<String, Arc<PoolDescriptor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Deterministic worker identifier for `(pool, index)`; index is 1-based.
pub(crate) fn worker_name(pool: &str, index: usize) -> String {
    format!("{pool}-worker-{index}")
}

fn descriptor_from(shared: &Arc<PoolShared>, options: PoolOptions) -> PoolDescriptor {
    PoolDescriptor::new(
        shared.name.clone(),
        Arc::clone(&shared.workers),
        options,
        shared.queue.clone(),
        shared.born,
        Arc::clone(&shared.alive),
    )
}

/// Publishes a new pool. Fails when a live pool already owns the name.
pub(crate) fn register(shared: Arc<PoolShared>) -> Result<Arc<PoolDescriptor>> {
    let mut supervisors = SUPERVISORS.write();
    if let Some(existing) = supervisors.get(&shared.name) {
        if existing.alive.load(Ordering::Acquire) {
            return Err(PoolError::already_started(&shared.name));
        }
    }

    let descriptor = Arc::new(descriptor_from(&shared, PoolOptions::from(&shared.config)));
    DESCRIPTORS
        .write()
        .insert(shared.name.clone(), Arc::clone(&descriptor));
    supervisors.insert(shared.name.clone(), shared);
    Ok(descriptor)
}

/// Looks a pool up by name, verifying its supervisor is alive.
///
/// A stale cache entry is removed and treated as absent; a missing entry
/// with a live supervisor triggers the rebuild path.
pub(crate) fn lookup(name: &str) -> Option<Arc<PoolDescriptor>> {
    let cached = DESCRIPTORS.read().get(name).cloned();
    match cached {
        Some(descriptor) if descriptor.is_alive() => Some(descriptor),
        Some(descriptor) => {
            invalidate(name, &descriptor);
            None
        }
        None => rebuild(name),
    }
}

/// Removes the stale entries for a dead pool, but only the entries that
/// still belong to that incarnation: the name may already be owned by a
/// fresh pool.
fn invalidate(name: &str, descriptor: &Arc<PoolDescriptor>) {
    let mut supervisors = SUPERVISORS.write();
    let mut descriptors = DESCRIPTORS.write();
    if let Some(current) = descriptors.get(name) {
        if Arc::ptr_eq(current, descriptor) {
            descriptors.remove(name);
        }
    }
    if let Some(shared) = supervisors.get(name) {
        if descriptor.is_owned_by(&shared.alive) {
            supervisors.remove(name);
        }
    }
}

/// Rebuilds a descriptor from the live supervisor record. This path is rare
/// and worth a warning: it means the cache entry disappeared out-of-band.
fn rebuild(name: &str) -> Option<Arc<PoolDescriptor>> {
    let shared = SUPERVISORS.read().get(name).cloned()?;
    if !shared.alive.load(Ordering::Acquire) {
        let mut supervisors = SUPERVISORS.write();
        if let Some(current) = supervisors.get(name) {
            if Arc::ptr_eq(current, &shared) {
                supervisors.remove(name);
            }
        }
        return None;
    }

    warn!(pool = name, "pool descriptor missing; rebuilding from live supervisor");
    let descriptor = Arc::new(descriptor_from(
        &shared,
        PoolOptions::default_for(shared.workers.len()),
    ));
    DESCRIPTORS
        .write()
        .insert(name.to_string(), Arc::clone(&descriptor));
    Some(descriptor)
}

/// Fetches the authoritative record when the pool is alive.
pub(crate) fn shared(name: &str) -> Option<Arc<PoolShared>> {
    let shared = SUPERVISORS.read().get(name).cloned()?;
    shared.alive.load(Ordering::Acquire).then_some(shared)
}

/// Removes the registry entries belonging to this pool incarnation. A
/// same-named pool registered in the meantime is left untouched.
pub(crate) fn remove_pool(shared: &Arc<PoolShared>) {
    let mut supervisors = SUPERVISORS.write();
    let mut descriptors = DESCRIPTORS.write();
    if let Some(existing) = supervisors.get(&shared.name) {
        if Arc::ptr_eq(existing, shared) {
            supervisors.remove(&shared.name);
        }
    }
    if let Some(descriptor) = descriptors.get(&shared.name) {
        if descriptor.is_owned_by(&shared.alive) {
            descriptors.remove(&shared.name);
        }
    }
}

/// Names of all registered pools.
pub(crate) fn pool_names() -> Vec<String> {
    SUPERVISORS.read().keys().cloned().collect()
}

/// Deletes only the cached descriptor of a pool, leaving the supervisor
/// record in place. Exercises the lazy rebuild path; not part of the public
/// API surface.
#[doc(hidden)]
pub fn forget_descriptor(name: &str) {
    DESCRIPTORS.write().remove(name);
}
