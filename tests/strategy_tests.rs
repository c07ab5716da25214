//! Integration tests for the dispatch strategies

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use workpool::prelude::*;

fn settle() {
    // Give spawned workers a moment to advertise themselves
    thread::sleep(Duration::from_millis(150));
}

#[test]
fn test_unknown_pool_fails_no_workers() {
    assert!(matches!(
        workpool::best_worker("no-such-pool"),
        Err(PoolError::NoWorkers { .. })
    ));
    assert!(matches!(
        workpool::random_worker("no-such-pool"),
        Err(PoolError::NoWorkers { .. })
    ));
    assert!(matches!(
        workpool::next_worker("no-such-pool"),
        Err(PoolError::NoWorkers { .. })
    ));
    assert!(matches!(
        workpool::hash_worker("no-such-pool", "key"),
        Err(PoolError::NoWorkers { .. })
    ));
    assert!(matches!(
        workpool::next_available_worker("no-such-pool"),
        Err(PoolError::NoWorkers { .. })
    ));
    assert!(matches!(
        workpool::call_available_worker("no-such-pool", || Ok(()), Duration::from_millis(10)),
        Err(PoolError::NoWorkers { .. })
    ));
    assert!(matches!(
        workpool::cast_to_available_worker(
            "no-such-pool",
            ClosureTask::new(|| Ok(()))
        ),
        Err(PoolError::NoWorkers { .. })
    ));
}

#[test]
fn test_next_worker_cycles_through_pool() {
    let pool = workpool::start_pool("st-rr", PoolConfig::new(4)).unwrap();
    settle();

    let picks: Vec<String> = (0..8).map(|_| workpool::next_worker("st-rr").unwrap()).collect();
    let expected: Vec<String> = (1..=4)
        .chain(1..=4)
        .map(|i| format!("st-rr-worker-{i}"))
        .collect();
    assert_eq!(picks, expected);

    pool.stop().unwrap();
}

#[test]
fn test_hash_worker_sticky() {
    let pool = workpool::start_pool("st-hash", PoolConfig::new(4)).unwrap();
    settle();

    let first = workpool::hash_worker("st-hash", "abc").unwrap();
    let second = workpool::hash_worker("st-hash", "abc").unwrap();
    assert_eq!(first, second);

    pool.stop().unwrap();
}

#[test]
fn test_best_worker_returns_valid_identifier() {
    let pool = workpool::start_pool("st-best", PoolConfig::new(3)).unwrap();
    settle();

    let names = workpool::get_workers("st-best").unwrap();
    for _ in 0..20 {
        let picked = workpool::best_worker("st-best").unwrap();
        assert!(names.contains(&picked));
    }

    pool.stop().unwrap();
}

#[test]
fn test_next_available_worker_on_busy_pool() {
    let pool = workpool::start_pool("st-avail", PoolConfig::new(2)).unwrap();
    settle();

    // A free pool has an available worker
    assert!(workpool::next_available_worker("st-avail").is_ok());

    // Occupy both workers with gated tasks
    let gate = Arc::new(std::sync::atomic::AtomicBool::new(false));
    for _ in 0..2 {
        let gate_clone = Arc::clone(&gate);
        workpool::execute("st-avail", Strategy::NextWorker, move || {
            while !gate_clone.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        })
        .unwrap();
    }
    thread::sleep(Duration::from_millis(150));

    assert!(matches!(
        workpool::next_available_worker("st-avail"),
        Err(PoolError::NoAvailableWorkers { .. })
    ));

    gate.store(true, Ordering::Release);
    thread::sleep(Duration::from_millis(150));
    assert!(workpool::next_available_worker("st-avail").is_ok());

    pool.stop().unwrap();
}

#[test]
fn test_available_worker_casts_spread_over_idle_pool() {
    let pool = workpool::start_pool("st-spread", PoolConfig::new(3)).unwrap();
    settle();

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..4 {
        let seen_clone = Arc::clone(&seen);
        workpool::execute_on_available_worker("st-spread", move || {
            let me = thread::current().name().unwrap_or("?").to_string();
            seen_clone.lock().push(me);
            thread::sleep(Duration::from_millis(50));
            Ok(())
        })
        .unwrap();
    }

    thread::sleep(Duration::from_millis(500));
    let seen = seen.lock();
    assert_eq!(seen.len(), 4);

    // The first three casts match three distinct idle workers; the fourth
    // goes to whichever frees up first.
    let mut distinct: Vec<&String> = seen.iter().collect();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len(), 3);

    pool.stop().unwrap();
}

#[test]
fn test_broadcast_reaches_every_worker() {
    let pool = workpool::start_pool("st-bcast", PoolConfig::new(3)).unwrap();
    settle();

    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = Arc::clone(&counter);
    workpool::broadcast("st-bcast", move || {
        counter_clone.fetch_add(1, Ordering::Relaxed);
        Ok(())
    })
    .unwrap();

    thread::sleep(Duration::from_millis(300));
    assert_eq!(counter.load(Ordering::Relaxed), 3);

    pool.stop().unwrap();
}

#[test]
fn test_cast_to_named_worker() {
    let pool = workpool::start_pool("st-direct", PoolConfig::new(2)).unwrap();
    settle();

    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    workpool::cast_to(
        "st-direct",
        "st-direct-worker-2",
        ClosureTask::new(move || {
            hits_clone.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(200));
    assert_eq!(hits.load(Ordering::Relaxed), 1);

    assert!(matches!(
        workpool::cast_to("st-direct", "st-direct-worker-9", ClosureTask::new(|| Ok(()))),
        Err(PoolError::InvalidRequest { .. })
    ));

    pool.stop().unwrap();
}

#[test]
fn test_custom_strategy_over_descriptor() {
    let pool = workpool::start_pool("st-custom", PoolConfig::new(3)).unwrap();
    settle();

    let descriptor = workpool::descriptor("st-custom").unwrap();
    assert_eq!(descriptor.size(), 3);
    assert_eq!(descriptor.next(2), "st-custom-worker-2");
    assert_eq!(descriptor.next(5), "st-custom-worker-2");

    // An always-pin-to-first-worker strategy, written by the caller
    let target = descriptor.next(1).to_string();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    workpool::cast_to(
        "st-custom",
        &target,
        ClosureTask::new(move || {
            hits_clone.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(200));
    assert_eq!(hits.load(Ordering::Relaxed), 1);

    pool.stop().unwrap();
}

#[test]
fn test_registry_rebuild_after_lost_descriptor() {
    let pool = workpool::start_pool("st-rebuild", PoolConfig::new(3)).unwrap();
    settle();

    // Drop the cached descriptor out-of-band; the supervisor stays alive
    workpool::forget_descriptor("st-rebuild");

    let picked = workpool::best_worker("st-rebuild").unwrap();
    assert!(picked.starts_with("st-rebuild-worker-"));

    let stats = workpool::pool_stats("st-rebuild").unwrap();
    assert_eq!(stats.size, 3);

    pool.stop().unwrap();
}

#[test]
fn test_call_with_direct_strategy() {
    let pool = workpool::start_pool("st-call", PoolConfig::new(2)).unwrap();
    settle();

    let reply = workpool::call(
        "st-call",
        Strategy::NextWorker,
        || Ok("pong".to_string()),
        Duration::from_secs(1),
    )
    .unwrap();
    assert_eq!(reply, "pong");

    let failure: workpool::Result<()> = workpool::call(
        "st-call",
        Strategy::RandomWorker,
        || Err(PoolError::other("deliberate")),
        Duration::from_secs(1),
    );
    assert!(failure.is_err());

    pool.stop().unwrap();
}
