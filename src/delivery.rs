use std::fmt::{Debug, Display};

use async_trait::async_trait;

/// One received message, settled exactly once.
///
/// Both operations consume the delivery, so a handle can only ever be acknowledged or rejected a
/// single time. Whoever owns the delivery decides its fate: the [`BatchAdapter`] for items that
/// made it into a batch, or the accumulator itself for items offered after it was closed.
///
/// [`BatchAdapter`]: crate::BatchAdapter
#[async_trait]
pub trait Delivery: Send + 'static {
    /// The error returned when the broker could not be told about the outcome.
    type Error: Display + Debug + Send;

    /// Acknowledge successful processing.
    async fn ack(self) -> Result<(), Self::Error>;

    /// Reject the message, optionally asking for it to be redelivered.
    async fn reject(self, requeue: bool) -> Result<(), Self::Error>;
}
