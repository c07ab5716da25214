//! Worker-selection strategies.
//!
//! A strategy maps a submission to a worker index. All strategies operate on
//! the published [`PoolDescriptor`] without locks: probes read mailbox
//! lengths and liveness flags, and `NextWorker` is a single atomic
//! compare-and-swap attempt on the round-robin cursor.

use crate::core::{PoolError, Result};
use crate::pool::PoolDescriptor;
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Rule for mapping a submission to a worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Probe all workers from a random start and pick the one with the
    /// shortest mailbox. Dead workers count as infinitely long.
    BestWorker,
    /// Pick a worker uniformly at random
    RandomWorker,
    /// Round-robin over the atomic cursor
    NextWorker,
    /// First worker that is idle right now; fails with
    /// [`PoolError::NoAvailableWorkers`] when every worker is busy
    NextAvailableWorker,
    /// Queue the submission with the queue manager until a worker frees up
    AvailableWorker,
    /// Deterministic worker for a pre-hashed key; build one with
    /// [`Strategy::hash_worker`]
    HashWorker(u64),
}

impl Strategy {
    /// Hash strategy for an arbitrary key. The same key always maps to the
    /// same worker for a given pool size.
    pub fn hash_worker<K: Hash>(key: K) -> Self {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        Strategy::HashWorker(hasher.finish())
    }
}

/// Selects a worker index (1-based) for every strategy that resolves to a
/// single worker immediately. `AvailableWorker` submissions go through the
/// queue manager instead and are rejected here.
pub(crate) fn select(descriptor: &PoolDescriptor, strategy: Strategy) -> Result<usize> {
    match strategy {
        Strategy::BestWorker => Ok(best_worker(descriptor)),
        Strategy::RandomWorker => Ok(random_worker(descriptor)),
        Strategy::NextWorker => Ok(descriptor.advance_cursor()),
        Strategy::NextAvailableWorker => next_available_worker(descriptor),
        Strategy::HashWorker(hash) => Ok(hash_worker(descriptor, hash)),
        Strategy::AvailableWorker => Err(PoolError::invalid_request(
            "the available_worker strategy dispatches through the queue manager",
        )),
    }
}

/// Linear scan for the shortest mailbox. The random starting point prevents
/// herding on worker 1 when several mailboxes are tied.
fn best_worker(descriptor: &PoolDescriptor) -> usize {
    let size = descriptor.size();
    let start = rand::rng().random_range(0..size);
    let mut best = start + 1;
    let mut best_len = usize::MAX;

    for probe in 0..size {
        let index = ((start + probe) % size) + 1;
        let worker = descriptor.worker(index);
        let len = if worker.is_alive() {
            worker.mailbox_len()
        } else {
            usize::MAX
        };
        if len < best_len {
            best_len = len;
            best = index;
        }
    }

    best
}

fn random_worker(descriptor: &PoolDescriptor) -> usize {
    rand::rng().random_range(0..descriptor.size()) + 1
}

fn hash_worker(descriptor: &PoolDescriptor, hash: u64) -> usize {
    (hash % descriptor.size() as u64) as usize + 1
}

fn next_available_worker(descriptor: &PoolDescriptor) -> Result<usize> {
    let size = descriptor.size();
    let start = rand::rng().random_range(0..size);

    for probe in 0..size {
        let index = ((start + probe) % size) + 1;
        if descriptor.worker(index).is_available() {
            return Ok(index);
        }
    }

    Err(PoolError::no_available_workers(descriptor.name()))
}
