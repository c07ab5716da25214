//! Error types for the worker pool library

use std::time::Duration;

/// Result type for worker pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur in the worker pool library
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool is unknown or its supervisor is dead
    #[error("Pool '{pool}' has no workers (unknown pool or dead supervisor)")]
    NoWorkers {
        /// Name of the pool
        pool: String,
    },

    /// Every worker was busy for a strategy that requires an idle worker
    #[error("Pool '{pool}' has no available workers")]
    NoAvailableWorkers {
        /// Name of the pool
        pool: String,
    },

    /// A call did not complete before its deadline
    #[error("Call timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The pool's queue manager is not running
    #[error("Queue manager for pool '{pool}' is not running")]
    Noproc {
        /// Name of the pool
        pool: String,
    },

    /// A request could not be understood or fulfilled as submitted
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem
        message: String,
    },

    /// A task raised an error or panicked while executing
    #[error("Task failed: {reason}")]
    TaskFailure {
        /// Underlying failure reason
        reason: String,
    },

    /// A pool with this name is already running
    #[error("Pool '{pool}' is already started")]
    AlreadyStarted {
        /// Name of the pool
        pool: String,
    },

    /// Callback registration was attempted on a pool without callbacks enabled
    #[error("Callbacks are not enabled for pool '{pool}'")]
    CallbacksDisabled {
        /// Name of the pool
        pool: String,
    },

    /// Invalid configuration with parameter
    #[error("Invalid configuration for '{parameter}': {message}")]
    InvalidConfig {
        /// Configuration parameter name
        parameter: String,
        /// Error message
        message: String,
    },

    /// Failed to spawn a pool thread
    #[error("Failed to spawn thread '{thread}': {message}")]
    SpawnError {
        /// Name of the thread that failed to spawn
        thread: String,
        /// Error message
        message: String,
        /// Source IO error
        #[source]
        source: std::io::Error,
    },

    /// General error
    #[error("{0}")]
    Other(String),
}

impl PoolError {
    /// Create a no workers error
    pub fn no_workers(pool: impl Into<String>) -> Self {
        PoolError::NoWorkers { pool: pool.into() }
    }

    /// Create a no available workers error
    pub fn no_available_workers(pool: impl Into<String>) -> Self {
        PoolError::NoAvailableWorkers { pool: pool.into() }
    }

    /// Create a timeout error
    pub fn timeout(timeout: Duration) -> Self {
        PoolError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a noproc error
    pub fn noproc(pool: impl Into<String>) -> Self {
        PoolError::Noproc { pool: pool.into() }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        PoolError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a task failure error
    pub fn task_failure(reason: impl Into<String>) -> Self {
        PoolError::TaskFailure {
            reason: reason.into(),
        }
    }

    /// Create an already started error
    pub fn already_started(pool: impl Into<String>) -> Self {
        PoolError::AlreadyStarted { pool: pool.into() }
    }

    /// Create a callbacks disabled error
    pub fn callbacks_disabled(pool: impl Into<String>) -> Self {
        PoolError::CallbacksDisabled { pool: pool.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        PoolError::InvalidConfig {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a spawn error with source
    pub fn spawn_with_source(
        thread: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        PoolError::SpawnError {
            thread: thread.into(),
            message: message.into(),
            source,
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PoolError::Other(msg.into())
    }
}
