use std::future::Future;
use thiserror::Error;
use tokio::task::JoinError;

use crate::events::watch::WatchError;
use crate::runner::SqlRunnerError;

/// Errors surfaced when waiting for an actor task to complete.
#[derive(Debug, Error)]
pub enum WorkerWaitError {
    #[error("The worker task panicked or was cancelled: {0}")]
    Join(#[from] JoinError),

    #[error("The sql runner terminated with an error: {0}")]
    SqlRunner(#[from] SqlRunnerError),

    #[error("The resource watch terminated with an error: {0}")]
    Watch(#[from] WatchError),
}

/// A trait for types that can be started as workers.
///
/// The generic parameter `H` represents the handle type that will be returned
/// when the worker starts, and `S` represents the state type that can be
/// accessed through the handle.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type.
    type Error;

    /// Starts the worker and returns a future that resolves to its handle.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// A handle to a running worker that provides access to its state and
/// completion status.
pub trait WorkerHandle<S> {
    /// Returns the current state of the worker.
    fn state(&self) -> S;

    /// Returns a future that resolves when the worker completes.
    fn wait(self) -> impl Future<Output = Result<(), WorkerWaitError>> + Send;
}
