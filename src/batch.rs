use std::{fmt::Debug, future::Future, marker::PhantomData};

use async_trait::async_trait;
use tracing::Span;

use crate::delivery::Delivery;

/// A delivery waiting in a batch, together with the context it was handed in with.
#[derive(Debug)]
pub struct BatchItem<C, D> {
    /// Caller-supplied context, carried through to the adapter untouched.
    pub context: C,
    /// The delivery to settle.
    pub delivery: D,
    /// The span that was current when this item was handed in.
    requesting_span: Span,
}

impl<C, D> BatchItem<C, D> {
    pub(crate) fn new(context: C, delivery: D, requesting_span: Span) -> Self {
        Self {
            context,
            delivery,
            requesting_span,
        }
    }

    /// The span this item was handed in from.
    pub fn span(&self) -> &Span {
        &self.requesting_span
    }

    /// Split the item into its context and delivery.
    pub fn into_parts(self) -> (C, D) {
        (self.context, self.delivery)
    }
}

/// Process a batch of deliveries.
///
/// Called by the worker with a non-empty batch, in the order the items were accepted. The adapter
/// takes ownership of the whole batch, and with it the responsibility to [`ack`](Delivery::ack) or
/// [`reject`](Delivery::reject) every delivery in it.
///
/// The worker waits for `handle` to return before accepting more items, so a slow adapter slows
/// down producers. A panic terminates the worker.
#[async_trait]
pub trait BatchAdapter: Send + Sync + 'static {
    /// Context passed in alongside each delivery.
    type Context: Send + 'static;
    /// The delivery handle type.
    type Delivery: Delivery;

    /// Process the batch.
    async fn handle(&self, batch: Vec<BatchItem<Self::Context, Self::Delivery>>);
}

/// A [`BatchAdapter`] backed by an async function. Created with [`adapter_fn`].
pub struct AdapterFn<C, D, F> {
    f: F,
    _items: PhantomData<fn(C, D)>,
}

/// Use an async function as a [`BatchAdapter`].
///
/// ```
/// # use delivery_batcher::{adapter_fn, BatchItem, Delivery};
/// # async fn example<D: Delivery>() {
/// let adapter = adapter_fn(|batch: Vec<BatchItem<(), D>>| async move {
///     for item in batch {
///         let _ = item.delivery.ack().await;
///     }
/// });
/// # }
/// ```
pub fn adapter_fn<C, D, F, Fut>(f: F) -> AdapterFn<C, D, F>
where
    F: Fn(Vec<BatchItem<C, D>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    AdapterFn {
        f,
        _items: PhantomData,
    }
}

#[async_trait]
impl<C, D, F, Fut> BatchAdapter for AdapterFn<C, D, F>
where
    C: Send + 'static,
    D: Delivery,
    F: Fn(Vec<BatchItem<C, D>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    type Context = C;
    type Delivery = D;

    async fn handle(&self, batch: Vec<BatchItem<C, D>>) {
        (self.f)(batch).await
    }
}

impl<C, D, F> Debug for AdapterFn<C, D, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterFn").finish_non_exhaustive()
    }
}
