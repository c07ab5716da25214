//! Integration tests for the queue manager and call timeouts

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use workpool::prelude::*;

fn settle() {
    thread::sleep(Duration::from_millis(150));
}

/// Holds the pool's single worker busy until the gate opens.
fn occupy_worker(pool: &str) -> Arc<AtomicBool> {
    let gate = Arc::new(AtomicBool::new(false));
    let gate_clone = Arc::clone(&gate);
    workpool::execute_on_available_worker(pool, move || {
        while !gate_clone.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    })
    .unwrap();
    thread::sleep(Duration::from_millis(100));
    gate
}

#[test]
fn test_saturated_pool_preserves_submission_order() {
    let pool = workpool::start_pool("qt-order", PoolConfig::new(1)).unwrap();
    settle();

    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    for i in 1..=3 {
        let order_clone = Arc::clone(&order);
        workpool::execute_on_available_worker("qt-order", move || {
            order_clone.lock().push(i);
            thread::sleep(Duration::from_millis(100));
            Ok(())
        })
        .unwrap();
    }

    // With one worker busy on the first task, at least two tasks sit in
    // the engine right after submission.
    thread::sleep(Duration::from_millis(30));
    let stats = workpool::pool_stats("qt-order").unwrap();
    assert!(
        stats.total_message_queue_len >= 2,
        "expected at least 2 queued, saw {}",
        stats.total_message_queue_len
    );

    thread::sleep(Duration::from_millis(500));
    assert_eq!(*order.lock(), vec![1, 2, 3]);
    let stats = workpool::pool_stats("qt-order").unwrap();
    assert_eq!(stats.total_message_queue_len, 0);

    // Three 100ms tasks ran on the single worker
    let worker = &stats.workers[0];
    assert!(worker.busy_time >= Duration::from_millis(250));
    assert!(worker.avg_task_time >= Duration::from_millis(50));

    pool.stop().unwrap();
}

#[test]
fn test_lifo_queue_discipline() {
    let config = PoolConfig::new(1).with_queue_type(QueueType::Lifo);
    let pool = workpool::start_pool("qt-lifo", config).unwrap();
    settle();

    let gate = occupy_worker("qt-lifo");

    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    for i in 1..=3 {
        let order_clone = Arc::clone(&order);
        workpool::execute_on_available_worker("qt-lifo", move || {
            order_clone.lock().push(i);
            Ok(())
        })
        .unwrap();
    }
    thread::sleep(Duration::from_millis(100));

    gate.store(true, Ordering::Release);
    thread::sleep(Duration::from_millis(400));

    assert_eq!(*order.lock(), vec![3, 2, 1]);
    pool.stop().unwrap();
}

#[test]
fn test_call_available_worker_replies() {
    let pool = workpool::start_pool("qt-call", PoolConfig::new(2)).unwrap();
    settle();

    let reply =
        workpool::call_available_worker("qt-call", || Ok(6 * 7), Duration::from_secs(1)).unwrap();
    assert_eq!(reply, 42);

    pool.stop().unwrap();
}

#[test]
fn test_call_timeout_on_busy_pool() {
    let pool = workpool::start_pool("qt-timeout", PoolConfig::new(1)).unwrap();
    settle();

    let gate = occupy_worker("qt-timeout");

    let start = Instant::now();
    let result: workpool::Result<u32> =
        workpool::call_available_worker("qt-timeout", || Ok(1), Duration::from_millis(50));
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(PoolError::Timeout { .. })));
    assert!(
        elapsed < Duration::from_millis(300),
        "timeout took {elapsed:?}"
    );

    gate.store(true, Ordering::Release);
    pool.stop().unwrap();
}

#[test]
fn test_zero_timeout_leaves_no_stale_entry() {
    let pool = workpool::start_pool("qt-zero", PoolConfig::new(1)).unwrap();
    settle();

    let gate = occupy_worker("qt-zero");

    let result: workpool::Result<u32> =
        workpool::call_available_worker("qt-zero", || Ok(1), Duration::ZERO);
    assert!(matches!(result, Err(PoolError::Timeout { .. })));

    thread::sleep(Duration::from_millis(100));
    assert_eq!(workpool::pending_task_count("qt-zero").unwrap(), 0);

    gate.store(true, Ordering::Release);
    pool.stop().unwrap();
}

#[test]
fn test_expired_call_reply_discarded() {
    let pool = workpool::start_pool("qt-discard", PoolConfig::new(1)).unwrap();
    settle();

    let gate = occupy_worker("qt-discard");

    // Times out while queued; the worker is still busy
    let executed = Arc::new(AtomicBool::new(false));
    let executed_clone = Arc::clone(&executed);
    let result: workpool::Result<u32> = workpool::call_available_worker(
        "qt-discard",
        move || {
            executed_clone.store(true, Ordering::Release);
            Ok(1)
        },
        Duration::from_millis(50),
    );
    assert!(matches!(result, Err(PoolError::Timeout { .. })));

    // Once the worker frees up, the expired call must be reaped, not run
    gate.store(true, Ordering::Release);
    thread::sleep(Duration::from_millis(300));
    assert!(!executed.load(Ordering::Acquire));

    pool.stop().unwrap();
}

#[test]
fn test_send_request_delivers_reply_asynchronously() {
    let pool = workpool::start_pool("qt-request", PoolConfig::new(1)).unwrap();
    settle();

    let request = workpool::send_request_available_worker(
        "qt-request",
        || {
            thread::sleep(Duration::from_millis(100));
            Ok("done".to_string())
        },
        Duration::from_secs(1),
    )
    .unwrap();

    assert!(request.try_wait().is_none());
    assert_eq!(request.wait().unwrap(), "done");

    pool.stop().unwrap();
}

#[test]
fn test_send_request_queueing_timeout() {
    let pool = workpool::start_pool("qt-request-to", PoolConfig::new(1)).unwrap();
    settle();

    let gate = occupy_worker("qt-request-to");

    let request: workpool::PendingCall<u32> = workpool::send_request_available_worker(
        "qt-request-to",
        || Ok(1),
        Duration::from_millis(50),
    )
    .unwrap();

    // The queueing deadline passes while the worker is busy
    assert!(matches!(
        request.wait_for(Duration::from_secs(1)),
        Err(PoolError::Timeout { .. })
    ));

    gate.store(true, Ordering::Release);
    pool.stop().unwrap();
}

#[test]
fn test_cast_never_blocks_caller() {
    let pool = workpool::start_pool("qt-nonblock", PoolConfig::new(1)).unwrap();
    settle();

    let gate = occupy_worker("qt-nonblock");

    let start = Instant::now();
    for _ in 0..50 {
        workpool::cast_to_available_worker("qt-nonblock", ClosureTask::new(|| Ok(())))
            .unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(100));

    gate.store(true, Ordering::Release);
    pool.stop().unwrap();
}

#[test]
fn test_single_worker_cast_order_end_to_end() {
    let pool = workpool::start_pool("qt-fifo-e2e", PoolConfig::new(1)).unwrap();
    settle();

    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    for i in 1..=20 {
        let order_clone = Arc::clone(&order);
        workpool::cast_to_available_worker(
            "qt-fifo-e2e",
            ClosureTask::new(move || {
                order_clone.lock().push(i);
                Ok(())
            }),
        )
        .unwrap();
    }

    thread::sleep(Duration::from_millis(500));
    assert_eq!(*order.lock(), (1..=20).collect::<Vec<_>>());

    pool.stop().unwrap();
}

#[test]
fn test_crash_isolation() {
    let pool = workpool::start_pool("qt-crash", PoolConfig::new(2)).unwrap();
    settle();

    // A panicking task is caught by the worker's executor
    workpool::execute("qt-crash", Strategy::NextWorker, || {
        panic!("intentional panic for testing");
    })
    .unwrap();
    workpool::execute("qt-crash", Strategy::NextWorker, || {
        Err(PoolError::other("deliberate failure"))
    })
    .unwrap();
    thread::sleep(Duration::from_millis(200));

    // Peers are unaffected and the pool keeps its size
    let reply =
        workpool::call_available_worker("qt-crash", || Ok(7), Duration::from_secs(1)).unwrap();
    assert_eq!(reply, 7);

    let stats = workpool::pool_stats("qt-crash").unwrap();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.workers.len(), 2);
    let panicked: u64 = stats.workers.iter().map(|w| w.tasks_panicked).sum();
    let failed: u64 = stats.workers.iter().map(|w| w.tasks_failed).sum();
    assert_eq!(panicked, 1);
    assert_eq!(failed, 1);

    pool.stop().unwrap();
}
