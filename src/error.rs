//! Errors returned by the accumulator.

use thiserror::Error;

/// An invalid [`BatchConfig`](crate::BatchConfig).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A batch must be allowed to hold at least one item.
    #[error("max_size must be greater than zero")]
    ZeroMaxSize,

    /// An idle interval of zero would flush on every poll.
    #[error("idle_interval must be greater than zero")]
    ZeroIdleInterval,
}

/// Something went wrong while handing a delivery to the worker.
///
/// Handing a delivery to a closed accumulator is _not_ an error: the delivery is rejected with a
/// requeue request and the call succeeds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandleError {
    /// The worker task is no longer running, most likely because the adapter panicked.
    ///
    /// Unrecoverable.
    #[error("Unable to hand the delivery to the batch worker: worker has stopped")]
    WorkerStopped,
}
