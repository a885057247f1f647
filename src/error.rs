//! Error kinds shared across the harness.

use thiserror::Error;

/// Failure raised by a user-supplied lifecycle hook.
///
/// Hooks report errors as boxed trait objects so workload authors can `?`
/// whatever error type their code produces.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything that can abort a benchmark.
///
/// There is no local recovery: the first error at job construction or
/// sampler execution aborts the current benchmark and releases all jobs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A CLI argument, op string, or trace file could not be parsed.
    #[error("argument error: {0}")]
    ArgParse(String),

    /// The `init` hook raised; the job never started.
    #[error("init hook failed: {0}")]
    InitFailed(String),

    /// An `init_runner` hook raised; the concurrency transition failed.
    #[error("worker init hook failed: {0}")]
    WorkerInitFailed(String),

    /// A runner invocation raised. Per-worker; the worker retires.
    #[error("runner failed: {0}")]
    RunnerFault(String),

    /// An isolated runtime could not be spawned or never became ready.
    #[error("failed to start isolated runtime: {0}")]
    IsolationStartFailed(String),

    /// A control-plane exchange with an isolated runtime exceeded its bound.
    #[error("isolated runtime control call timed out")]
    IsolationTimeout,

    /// An isolated runtime failed after a successful start.
    #[error("isolated runtime failed: {0}")]
    IsolationFailed(String),

    /// The requested combination of options makes no sense.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
