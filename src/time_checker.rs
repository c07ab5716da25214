//! Task overrun watchdog.
//!
//! The time checker is a single-threaded serializer that receives start/stop
//! notices from workers and reports any task whose runtime exceeds the
//! configured wall-clock budget. It never interrupts the task; detection and
//! reporting are the extent of its job.

use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// A report handed to the overrun handler when a task exceeds its budget.
#[derive(Clone, Debug)]
pub struct OverrunReport {
    /// Name of the pool running the task
    pub pool: String,
    /// Identifier of the worker executing the task
    pub worker: String,
    /// The task's type name
    pub task: String,
    /// Wall-clock runtime observed so far
    pub runtime: Duration,
}

/// Handler invoked when a task overruns its wall-clock budget.
///
/// The default handler (used when none is configured) logs a warning.
pub type OverrunHandler = Arc<dyn Fn(&OverrunReport) + Send + Sync>;

/// Start/stop notices sent by workers.
pub(crate) enum TimeEvent {
    Started {
        task_id: u64,
        worker: String,
        desc: String,
        at: Instant,
    },
    Finished {
        task_id: u64,
    },
}

pub(crate) struct TimeCheckerContext {
    pub pool: String,
    pub rx: Receiver<TimeEvent>,
    pub warn_after: Option<Duration>,
    pub handler: Option<OverrunHandler>,
    pub stop: Arc<AtomicBool>,
    pub tick: Duration,
}

struct Running {
    worker: String,
    desc: String,
    at: Instant,
    reported: bool,
}

/// Main time checker loop; owns the running-task table.
pub(crate) fn run(ctx: TimeCheckerContext) {
    let mut running: HashMap<u64, Running> = HashMap::new();

    loop {
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }

        match ctx.rx.recv_timeout(ctx.tick) {
            Ok(TimeEvent::Started {
                task_id,
                worker,
                desc,
                at,
            }) => {
                running.insert(
                    task_id,
                    Running {
                        worker,
                        desc,
                        at,
                        reported: false,
                    },
                );
            }
            Ok(TimeEvent::Finished { task_id }) => {
                running.remove(&task_id);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        check_overruns(&ctx, &mut running);
    }
}

fn check_overruns(ctx: &TimeCheckerContext, running: &mut HashMap<u64, Running>) {
    let Some(budget) = ctx.warn_after else {
        return;
    };

    for entry in running.values_mut() {
        if entry.reported || entry.at.elapsed() < budget {
            continue;
        }
        entry.reported = true;
        let report = OverrunReport {
            pool: ctx.pool.clone(),
            worker: entry.worker.clone(),
            task: entry.desc.clone(),
            runtime: entry.at.elapsed(),
        };
        match &ctx.handler {
            Some(handler) => handler(&report),
            None => warn!(
                pool = %report.pool,
                worker = %report.worker,
                task = %report.task,
                runtime_ms = report.runtime.as_millis() as u64,
                "task overran its time budget"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use parking_lot::Mutex;
    use std::thread;

    #[test]
    fn test_overrun_reported_once() {
        let (tx, rx) = unbounded();
        let reports: Arc<Mutex<Vec<OverrunReport>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let stop = Arc::new(AtomicBool::new(false));

        let ctx = TimeCheckerContext {
            pool: "tc-pool".to_string(),
            rx,
            warn_after: Some(Duration::from_millis(20)),
            handler: Some(Arc::new(move |r: &OverrunReport| {
                sink.lock().push(r.clone());
            })),
            stop: Arc::clone(&stop),
            tick: Duration::from_millis(5),
        };
        let checker = thread::spawn(move || run(ctx));

        tx.send(TimeEvent::Started {
            task_id: 1,
            worker: "tc-pool-worker-1".to_string(),
            desc: "SlowTask".to_string(),
            at: Instant::now(),
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        tx.send(TimeEvent::Finished { task_id: 1 }).unwrap();
        thread::sleep(Duration::from_millis(20));

        stop.store(true, Ordering::Release);
        checker.join().unwrap();

        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].worker, "tc-pool-worker-1");
        assert_eq!(reports[0].task, "SlowTask");
        assert!(reports[0].runtime >= Duration::from_millis(20));
    }

    #[test]
    fn test_fast_task_not_reported() {
        let (tx, rx) = unbounded();
        let reports: Arc<Mutex<Vec<OverrunReport>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let stop = Arc::new(AtomicBool::new(false));

        let ctx = TimeCheckerContext {
            pool: "tc-pool-2".to_string(),
            rx,
            warn_after: Some(Duration::from_millis(200)),
            handler: Some(Arc::new(move |r: &OverrunReport| {
                sink.lock().push(r.clone());
            })),
            stop: Arc::clone(&stop),
            tick: Duration::from_millis(5),
        };
        let checker = thread::spawn(move || run(ctx));

        tx.send(TimeEvent::Started {
            task_id: 7,
            worker: "tc-pool-2-worker-1".to_string(),
            desc: "FastTask".to_string(),
            at: Instant::now(),
        })
        .unwrap();
        tx.send(TimeEvent::Finished { task_id: 7 }).unwrap();

        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Release);
        checker.join().unwrap();

        assert!(reports.lock().is_empty());
    }
}
