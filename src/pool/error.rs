use thiserror::Error;

use crate::pool::worker::WorkerState;

/// Errors surfaced by the dispatcher pool and its workers.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A worker received an assignment while not idle. Pool selection is
    /// serialized, so this surfaces to callers only if a worker is driven
    /// directly.
    #[error("worker is not accepting work (state: {state:?})")]
    NotAcceptingWork { state: WorkerState },

    /// `submit` was called after shutdown began. Recoverable by the
    /// caller; the pool never retries internally.
    #[error("dispatcher pool is shutting down")]
    PoolShuttingDown,

    /// Creating another worker would exceed the configured thread limit.
    #[error("maximum number of worker threads ({max}) reached")]
    ThreadLimitReached { max: usize },

    /// The OS refused to spawn a worker thread. Fatal to the `submit`
    /// call that triggered creation.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// Internal dispatcher error.
    #[error("internal dispatcher error: {0}")]
    Other(#[from] anyhow::Error),
}
