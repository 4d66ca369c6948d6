//! Accumulate queue deliveries into batches.
//!
//! Message consumers usually receive one delivery at a time, but many downstream operations are far
//! cheaper in bulk: _insert many rows_ rather than _insert one row_, one HTTP call instead of
//! fifty.
//!
//! A [`BatchAccumulator`] sits between the two. Consumer callbacks hand in deliveries one at a time
//! with [`BatchAccumulator::handle()`]. A single background worker buffers them and passes the
//! buffered batch to a [`BatchAdapter`] as soon as either:
//!
//! - the batch reaches [`max_size`](BatchConfig::max_size), or
//! - no new delivery has arrived for [`idle_interval`](BatchConfig::idle_interval).
//!
//! Handing in a delivery waits until the worker has taken it, so a slow adapter naturally slows
//! down the consumer. The adapter owns the deliveries it is given and decides whether to
//! acknowledge or reject each one.
//!
//! Closing the accumulator flushes whatever is pending. Deliveries handed in after that are
//! rejected with a requeue request rather than dropped.
//!
//! See the README for an example.

#![deny(missing_docs)]

#[cfg(doctest)]
use doc_comment::doctest;
#[cfg(doctest)]
doctest!("../README.md");

mod accumulator;
mod batch;
mod config;
mod delivery;
pub mod error;
mod worker;

pub use accumulator::BatchAccumulator;
pub use batch::{adapter_fn, AdapterFn, BatchAdapter, BatchItem};
pub use config::BatchConfig;
pub use delivery::Delivery;
pub use error::{ConfigError, HandleError};
