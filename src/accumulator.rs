use std::{fmt::Debug, mem, sync::Arc};

use bon::bon;
use tokio::{
    runtime::Handle,
    sync::{mpsc::error::SendError, oneshot, watch, Mutex},
};
use tracing::{debug, error, info, warn, Span};

use crate::{
    batch::{BatchAdapter, BatchItem},
    config::BatchConfig,
    delivery::Delivery,
    error::HandleError,
    worker::{Handoff, HandoffTx, Worker},
};

/// Accumulates deliveries into batches.
///
/// Deliveries are handed in one at a time with [`handle()`](Self::handle) and passed to a
/// background worker, which buffers them and calls the [`BatchAdapter`] whenever the batch is full
/// or no new delivery has arrived for the configured idle interval.
///
/// The worker is started lazily by the first call to `handle()`. Until then no task or timer is
/// running.
///
/// Cheap to clone. Cloned instances share the same background worker task.
///
/// ## Shutdown
///
/// [`close()`](Self::close) stops accepting new deliveries and tells the worker to flush whatever
/// is pending and exit. Deliveries handed in after that are rejected with a requeue request.
/// [`wait_for_shutdown()`](Self::wait_for_shutdown) waits for the worker to finish.
///
/// Dropping the last instance has the same effect as `close()`: pending items are still flushed.
pub struct BatchAccumulator<A: BatchAdapter> {
    inner: Arc<Inner<A>>,
}

struct Inner<A: BatchAdapter> {
    name: String,
    config: BatchConfig,
    /// Serialises producers with each other and with `close()`.
    lifecycle: Mutex<Lifecycle<A>>,
    terminated_rx: watch::Receiver<bool>,
}

enum Lifecycle<A: BatchAdapter> {
    /// Nothing has been handed in yet.
    NotStarted {
        adapter: A,
        terminated_tx: watch::Sender<bool>,
    },
    /// The worker is running. This is the only place the handoff sender lives, so once closed
    /// there is nothing left to send on.
    Running { item_tx: HandoffTx<A> },
    Closed,
}

#[bon]
impl<A: BatchAdapter> BatchAccumulator<A> {
    /// Create a new accumulator.
    ///
    /// Does not spawn anything, so can be called outside of a Tokio runtime.
    #[builder]
    pub fn new(
        /// Used to identify this accumulator in logs and traces.
        name: impl Into<String>,
        /// Processes each flushed batch.
        adapter: A,
        /// When to flush.
        #[builder(default)]
        config: BatchConfig,
    ) -> Self {
        let (terminated_tx, terminated_rx) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                lifecycle: Mutex::new(Lifecycle::NotStarted {
                    adapter,
                    terminated_tx,
                }),
                terminated_rx,
            }),
        }
    }

    /// Hand a delivery to the worker.
    ///
    /// Returns once the worker has added the delivery to the pending batch. While the worker is
    /// busy flushing, callers wait, so a slow adapter slows down producers.
    ///
    /// If the accumulator has been closed, the delivery is rejected with a requeue request instead
    /// and `Ok(())` is returned.
    ///
    /// Must not be called from within the adapter: the worker would wait on itself.
    ///
    /// # Cancel safety
    ///
    /// Dropping the returned future before the delivery has been sent to the worker (e.g. while
    /// waiting behind other producers) drops the delivery unsettled, and redelivery is left to the
    /// broker. Once sent, the delivery is part of the batch and will be flushed even if the caller
    /// stops waiting for the worker to accept it.
    ///
    /// # Panics
    ///
    /// If this is the first delivery and there is no Tokio runtime to start the worker on.
    pub async fn handle(
        &self,
        context: A::Context,
        delivery: A::Delivery,
    ) -> Result<(), HandleError> {
        // Record the span so the flush span can link back to it.
        let item = BatchItem::new(context, delivery, Span::current());

        // Held until the worker has accepted the item, so `close()` can never interleave with the
        // send.
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let Some(item_tx) = lifecycle.item_tx(&self.inner.name, self.inner.config) else {
            drop(lifecycle);
            debug!(
                "Accumulator '{}' is closed. Requeueing delivery",
                self.inner.name
            );
            self.requeue(item.delivery).await;
            return Ok(());
        };

        let (accepted, accepted_rx) = oneshot::channel();
        let sent = item_tx.send(Handoff { item, accepted }).await;
        if let Err(SendError(handoff)) = sent {
            drop(lifecycle);
            error!(
                "Batch worker '{}' has stopped. Requeueing delivery",
                self.inner.name
            );
            self.requeue(handoff.item.delivery).await;
            return Err(HandleError::WorkerStopped);
        }

        // From here the delivery belongs to the worker. If it dies before accepting, the delivery
        // is dropped unsettled and redelivery is up to the broker.
        accepted_rx.await.map_err(|_| {
            error!(
                "Batch worker '{}' stopped before accepting a delivery",
                self.inner.name
            );
            HandleError::WorkerStopped
        })
    }

    /// Stop accepting deliveries and signal the worker to flush any pending items and exit.
    ///
    /// Does not wait for the worker. Use [`wait_for_shutdown()`](Self::wait_for_shutdown) for
    /// that. Calling this more than once has no further effect.
    pub async fn close(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        match mem::replace(&mut *lifecycle, Lifecycle::Closed) {
            Lifecycle::NotStarted { terminated_tx, .. } => {
                // No worker, so nothing to drain.
                terminated_tx.send_modify(|terminated| *terminated = true);
                info!(
                    "Accumulator '{}' closed before the worker started",
                    self.inner.name
                );
            }
            Lifecycle::Running { item_tx } => {
                // Dropping the only sender closes the channel, which is the worker's signal to
                // drain.
                drop(item_tx);
                info!("Accumulator '{}' closed. Draining", self.inner.name);
            }
            Lifecycle::Closed => {
                debug!("Accumulator '{}' is already closed", self.inner.name);
            }
        }
    }

    /// Wait for the worker to flush its remaining items and exit.
    ///
    /// Resolves immediately if the accumulator was closed before it ever started. If it has not
    /// been closed (or dropped), this waits indefinitely.
    pub async fn wait_for_shutdown(&self) {
        let mut terminated_rx = self.inner.terminated_rx.clone();
        // An error means the worker went away without finishing, e.g. the adapter panicked.
        // Either way it is no longer running.
        let _ = terminated_rx.wait_for(|terminated| *terminated).await;
    }

    /// Whether [`close()`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        matches!(*self.inner.lifecycle.lock().await, Lifecycle::Closed)
    }

    /// The name given to this accumulator.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The flush configuration.
    pub fn config(&self) -> BatchConfig {
        self.inner.config
    }

    async fn requeue(&self, delivery: A::Delivery) {
        if let Err(err) = delivery.reject(true).await {
            // Nothing more we can do. The broker will redeliver once the channel goes away.
            warn!(
                "Unable to requeue delivery: {}. Accumulator: {}",
                err, self.inner.name
            );
        }
    }
}

impl<A: BatchAdapter> Lifecycle<A> {
    /// The handoff sender, starting the worker first if this is the first item.
    ///
    /// `None` once closed.
    fn item_tx(&mut self, name: &str, config: BatchConfig) -> Option<&HandoffTx<A>> {
        if let Lifecycle::NotStarted { .. } = self {
            self.start(name, config);
        }

        match self {
            Lifecycle::Running { item_tx } => Some(item_tx),
            Lifecycle::NotStarted { .. } | Lifecycle::Closed => None,
        }
    }

    /// Spawn the worker. Anything other than a successful spawn leaves the state as it was.
    ///
    /// # Panics
    ///
    /// Outside of a Tokio runtime. The adapter is kept, so a later call from within a runtime
    /// still starts the worker.
    fn start(&mut self, name: &str, config: BatchConfig) {
        match mem::replace(self, Lifecycle::Closed) {
            Lifecycle::NotStarted {
                adapter,
                terminated_tx,
            } => match Handle::try_current() {
                Ok(runtime) => {
                    let item_tx =
                        Worker::spawn(&runtime, name.to_string(), adapter, config, terminated_tx);
                    *self = Lifecycle::Running { item_tx };
                }
                Err(err) => {
                    *self = Lifecycle::NotStarted {
                        adapter,
                        terminated_tx,
                    };
                    panic!("Accumulator '{name}' can only start its worker inside a Tokio runtime: {err}");
                }
            },
            unchanged => *self = unchanged,
        }
    }
}

impl<A: BatchAdapter> Clone for BatchAccumulator<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: BatchAdapter> Debug for BatchAccumulator<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchAccumulator")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
