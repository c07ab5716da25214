//! Pool configuration

use crate::core::{PoolError, Result};
use crate::events::PoolCallbacks;
use crate::time_checker::OverrunHandler;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Discipline of the queue manager's pending-task queue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueType {
    /// First in, first out (default)
    #[default]
    Fifo,
    /// Last in, first out
    Lifo,
}

/// How workers are brought down when the pool stops
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Signal workers to stop and do not wait for them (default)
    Brutal,
    /// Wait up to the given duration for workers to finish their current task
    Timeout(Duration),
    /// Wait for workers indefinitely
    Infinity,
}

/// Configuration for a worker pool
#[derive(Clone)]
pub struct PoolConfig {
    /// Number of worker units (0 = number of CPUs)
    pub workers: usize,
    /// Pending-task queue discipline
    pub queue_type: QueueType,
    /// Duration between mailbox poll attempts in worker and serializer loops
    pub worker_poll_interval: Duration,
    /// Wall-clock budget after which a running task is reported as overrun
    /// (None disables overrun detection)
    pub overrun_warning: Option<Duration>,
    /// Handler invoked on overrun (None logs a warning)
    pub overrun_handler: Option<OverrunHandler>,
    /// Shutdown kind applied to the worker supervisor
    pub pool_sup_shutdown: ShutdownKind,
    /// Maximum number of restarts tolerated within `pool_sup_period`
    pub pool_sup_intensity: usize,
    /// Sliding window over which restarts are counted
    pub pool_sup_period: Duration,
    /// Whether the event manager is started and callbacks may be registered
    pub enable_callbacks: bool,
    /// Callback modules registered at pool start
    pub callbacks: Vec<Arc<dyn PoolCallbacks>>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 100,
            queue_type: QueueType::Fifo,
            worker_poll_interval: Duration::from_millis(100),
            overrun_warning: None,
            overrun_handler: None,
            pool_sup_shutdown: ShutdownKind::Brutal,
            pool_sup_intensity: 5,
            pool_sup_period: Duration::from_secs(60),
            enable_callbacks: false,
            callbacks: Vec::new(),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with the specified number of workers
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: if workers == 0 {
                num_cpus::get()
            } else {
                workers
            },
            ..Default::default()
        }
    }

    /// Set the pending-task queue discipline
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_queue_type(mut self, queue_type: QueueType) -> Self {
        self.queue_type = queue_type;
        self
    }

    /// Set the mailbox poll interval
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_worker_poll_interval(mut self, interval: Duration) -> Self {
        self.worker_poll_interval = interval;
        self
    }

    /// Set the overrun warning budget
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_overrun_warning(mut self, budget: Duration) -> Self {
        self.overrun_warning = Some(budget);
        self
    }

    /// Set the overrun handler
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_overrun_handler(mut self, handler: OverrunHandler) -> Self {
        self.overrun_handler = Some(handler);
        self
    }

    /// Set the worker supervisor shutdown kind
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_pool_sup_shutdown(mut self, kind: ShutdownKind) -> Self {
        self.pool_sup_shutdown = kind;
        self
    }

    /// Set the restart intensity
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_pool_sup_intensity(mut self, intensity: usize) -> Self {
        self.pool_sup_intensity = intensity;
        self
    }

    /// Set the restart period
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_pool_sup_period(mut self, period: Duration) -> Self {
        self.pool_sup_period = period;
        self
    }

    /// Enable the event manager so callbacks can be registered
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_callbacks_enabled(mut self) -> Self {
        self.enable_callbacks = true;
        self
    }

    /// Enable the event manager and register an initial set of callback modules
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_callbacks(mut self, callbacks: Vec<Arc<dyn PoolCallbacks>>) -> Self {
        self.enable_callbacks = true;
        self.callbacks = callbacks;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PoolError::invalid_config(
                "workers",
                "Number of workers must be greater than 0",
            ));
        }
        if self.pool_sup_period.is_zero() {
            return Err(PoolError::invalid_config(
                "pool_sup_period",
                "Restart period must be greater than 0",
            ));
        }
        if self.worker_poll_interval.is_zero() {
            return Err(PoolError::invalid_config(
                "worker_poll_interval",
                "Poll interval must be greater than 0",
            ));
        }
        if !self.enable_callbacks && !self.callbacks.is_empty() {
            return Err(PoolError::invalid_config(
                "callbacks",
                "Callback modules supplied but callbacks are not enabled",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("workers", &self.workers)
            .field("queue_type", &self.queue_type)
            .field("worker_poll_interval", &self.worker_poll_interval)
            .field("overrun_warning", &self.overrun_warning)
            .field("overrun_handler", &self.overrun_handler.is_some())
            .field("pool_sup_shutdown", &self.pool_sup_shutdown)
            .field("pool_sup_intensity", &self.pool_sup_intensity)
            .field("pool_sup_period", &self.pool_sup_period)
            .field("enable_callbacks", &self.enable_callbacks)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Normalized, comparable view of a pool's options, as reported by stats
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolOptions {
    /// Number of worker units
    pub workers: usize,
    /// Pending-task queue discipline
    pub queue_type: QueueType,
    /// Overrun warning budget in milliseconds, if enabled
    pub overrun_warning_ms: Option<u64>,
    /// Worker supervisor shutdown kind
    pub pool_sup_shutdown: ShutdownKind,
    /// Restart intensity
    pub pool_sup_intensity: usize,
    /// Restart period in seconds
    pub pool_sup_period_secs: u64,
    /// Whether callbacks are enabled
    pub enable_callbacks: bool,
}

impl PoolOptions {
    /// Options of a rebuilt descriptor, for which only the size is known
    pub(crate) fn default_for(workers: usize) -> Self {
        Self::from(&PoolConfig {
            workers,
            ..Default::default()
        })
    }
}

impl From<&PoolConfig> for PoolOptions {
    fn from(config: &PoolConfig) -> Self {
        Self {
            workers: config.workers,
            queue_type: config.queue_type,
            overrun_warning_ms: config.overrun_warning.map(|d| d.as_millis() as u64),
            pool_sup_shutdown: config.pool_sup_shutdown,
            pool_sup_intensity: config.pool_sup_intensity,
            pool_sup_period_secs: config.pool_sup_period.as_secs(),
            enable_callbacks: config.enable_callbacks,
        }
    }
}
