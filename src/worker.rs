use std::{
    fmt::{self, Display},
    mem,
    time::Duration,
};

use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, info, instrument::WithSubscriber, span, Instrument, Level};

use crate::{
    batch::{BatchAdapter, BatchItem},
    config::BatchConfig,
};

/// A single item in transit from a producer to the worker.
pub(crate) struct Handoff<C, D> {
    pub item: BatchItem<C, D>,
    /// Fired once the item has been appended to the pending batch.
    pub accepted: oneshot::Sender<()>,
}

pub(crate) type HandoffTx<A> =
    mpsc::Sender<Handoff<<A as BatchAdapter>::Context, <A as BatchAdapter>::Delivery>>;
type HandoffRx<A> =
    mpsc::Receiver<Handoff<<A as BatchAdapter>::Context, <A as BatchAdapter>::Delivery>>;

/// Why a batch was handed to the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushReason {
    /// The batch reached `max_size`.
    Full,
    /// No item arrived within `idle_interval`.
    Idle,
    /// The handoff channel was closed with items still pending.
    Drain,
}

enum State {
    Collecting,
    Flushing(FlushReason),
    Draining,
}

enum Event<C, D> {
    Item(Handoff<C, D>),
    Closed,
    IdleTimeout,
}

pub(crate) struct Worker<A: BatchAdapter> {
    accumulator_name: String,

    /// The callback to process a batch.
    adapter: A,

    max_size: usize,
    idle_interval: Duration,

    /// Receives items from producers. Closed when the accumulator is closed or dropped.
    item_rx: HandoffRx<A>,

    /// Only ever touched by the worker.
    pending: Vec<BatchItem<A::Context, A::Delivery>>,

    /// Set to `true` once the worker has drained and exited.
    terminated_tx: watch::Sender<bool>,
}

impl<A: BatchAdapter> Worker<A> {
    pub fn spawn(
        runtime: &Handle,
        accumulator_name: String,
        adapter: A,
        config: BatchConfig,
        terminated_tx: watch::Sender<bool>,
    ) -> HandoffTx<A> {
        // Producers also wait for the acceptance signal, so a single slot behaves like a
        // rendezvous.
        let (item_tx, item_rx) = mpsc::channel(1);

        let worker = Worker {
            accumulator_name,
            adapter,
            max_size: config.max_size,
            idle_interval: config.idle_interval,
            item_rx,
            pending: Vec::new(),
            terminated_tx,
        };

        runtime.spawn(worker.run().with_current_subscriber());

        item_tx
    }

    /// Start running the worker event loop.
    async fn run(mut self) {
        info!("Batch worker '{}' started", self.accumulator_name);

        let mut state = State::Collecting;
        loop {
            state = match state {
                State::Collecting => self.collect().await,
                State::Flushing(reason) => {
                    self.flush(reason).await;
                    State::Collecting
                }
                State::Draining => {
                    if !self.pending.is_empty() {
                        self.flush(FlushReason::Drain).await;
                    }
                    break;
                }
            };
        }

        info!("Batch worker '{}' has shut down", self.accumulator_name);
        self.terminated_tx.send_modify(|terminated| *terminated = true);
    }

    async fn collect(&mut self) -> State {
        // A fresh timer on every entry: it measures inactivity, not a fixed schedule.
        let idle = tokio::time::sleep(self.idle_interval);

        let event = tokio::select! {
            handoff = self.item_rx.recv() => match handoff {
                Some(handoff) => Event::Item(handoff),
                None => Event::Closed,
            },
            () = idle => Event::IdleTimeout,
        };

        match event {
            Event::Item(handoff) => self.accept(handoff),
            Event::Closed => {
                debug!(
                    "Handoff channel closed with {} pending item(s). Accumulator: {}",
                    self.pending.len(),
                    self.accumulator_name
                );
                State::Draining
            }
            Event::IdleTimeout if self.pending.is_empty() => State::Collecting,
            Event::IdleTimeout => State::Flushing(FlushReason::Idle),
        }
    }

    fn accept(&mut self, handoff: Handoff<A::Context, A::Delivery>) -> State {
        let Handoff { item, accepted } = handoff;

        self.pending.push(item);

        if accepted.send(()).is_err() {
            // The producer stopped waiting. The item is already part of the batch, so it will
            // still be flushed.
            debug!(
                "Unable to signal acceptance. Receiver deallocated. Accumulator: {}",
                self.accumulator_name
            );
        }

        if self.pending.len() >= self.max_size {
            State::Flushing(FlushReason::Full)
        } else {
            State::Collecting
        }
    }

    async fn flush(&mut self, reason: FlushReason) {
        debug_assert!(!self.pending.is_empty(), "should never flush an empty batch");

        let batch = mem::take(&mut self.pending);

        let span = span!(Level::INFO, "flush batch",
            batch.name = self.accumulator_name.as_str(),
            // Convert to u64 so tracing will treat this as an integer instead of a string.
            batch.size = batch.len() as u64,
            batch.reason = %reason,
        );
        for item in &batch {
            // Many producers feed one batch, so link rather than parent.
            span.follows_from(item.span());
        }

        self.adapter.handle(batch).instrument(span).await;
    }
}

impl Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushReason::Full => "full",
            FlushReason::Idle => "idle",
            FlushReason::Drain => "drain",
        })
    }
}
