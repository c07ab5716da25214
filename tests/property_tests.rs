//! Property-based tests for workpool using proptest

use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use workpool::prelude::*;

static POOL_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Pool names must be unique: the registry is process-wide and proptest
/// reuses test bodies across cases.
fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", POOL_SEQ.fetch_add(1, Ordering::Relaxed))
}

fn quick_config(workers: usize) -> PoolConfig {
    PoolConfig::new(workers).with_worker_poll_interval(Duration::from_millis(20))
}

// ============================================================================
// Configuration
// ============================================================================

proptest! {
    /// PoolConfig can be created with any worker count
    #[test]
    fn prop_config_worker_count(workers in 1usize..256) {
        let config = PoolConfig::new(workers);
        prop_assert_eq!(config.workers, workers);
        prop_assert!(config.validate().is_ok());
    }

    /// Builder combinations validate
    #[test]
    fn prop_config_builder(
        workers in 1usize..64,
        intensity in 0usize..20,
        period_secs in 1u64..600,
    ) {
        let config = PoolConfig::new(workers)
            .with_pool_sup_intensity(intensity)
            .with_pool_sup_period(Duration::from_secs(period_secs));
        prop_assert!(config.validate().is_ok());
    }
}

// ============================================================================
// Strategy invariants over live pools
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// The worker table always has exactly `size` entries and the cursor
    /// stays in [1, size] no matter how often it advances
    #[test]
    fn prop_cursor_in_range(size in 1usize..5, calls in 1usize..40) {
        let name = unique_name("prop-cursor");
        let pool = workpool::start_pool(&name, quick_config(size)).unwrap();

        prop_assert_eq!(workpool::get_workers(&name).unwrap().len(), size);
        for _ in 0..calls {
            let picked = workpool::next_worker(&name).unwrap();
            let expected_prefix = format!("{}-worker-", name);
            prop_assert!(picked.starts_with(&expected_prefix));
            let descriptor = workpool::descriptor(&name).unwrap();
            let cursor = descriptor.next_index();
            prop_assert!(cursor >= 1 && cursor <= size);
        }

        pool.stop().unwrap();
    }

    /// Uncontested round-robin yields each worker exactly once per cycle
    #[test]
    fn prop_round_robin_cycle(size in 1usize..6) {
        let name = unique_name("prop-cycle");
        let pool = workpool::start_pool(&name, quick_config(size)).unwrap();

        for cycle in 0..2 {
            let mut seen = Vec::with_capacity(size);
            for _ in 0..size {
                seen.push(workpool::next_worker(&name).unwrap());
            }
            let mut deduped = seen.clone();
            deduped.sort();
            deduped.dedup();
            prop_assert_eq!(deduped.len(), size, "cycle {} repeated a worker", cycle);
        }

        pool.stop().unwrap();
    }

    /// The same key always hashes to the same worker
    #[test]
    fn prop_hash_worker_deterministic(size in 1usize..6, key in any::<u64>()) {
        let name = unique_name("prop-hash");
        let pool = workpool::start_pool(&name, quick_config(size)).unwrap();

        let first = workpool::hash_worker(&name, key).unwrap();
        let second = workpool::hash_worker(&name, key).unwrap();
        prop_assert_eq!(first, second);

        pool.stop().unwrap();
    }

    /// Every cast through the queue manager eventually executes
    #[test]
    fn prop_queued_casts_all_execute(size in 1usize..4, tasks in 1usize..20) {
        let name = unique_name("prop-casts");
        let pool = workpool::start_pool(&name, quick_config(size)).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..tasks {
            let counter_clone = Arc::clone(&counter);
            workpool::execute_on_available_worker(&name, move || {
                counter_clone.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }).unwrap();
        }

        std::thread::sleep(Duration::from_millis(400));
        prop_assert_eq!(counter.load(Ordering::Relaxed), tasks);
        prop_assert_eq!(workpool::pending_task_count(&name).unwrap(), 0);

        pool.stop().unwrap();
    }
}
