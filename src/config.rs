use std::{
    fmt::{self, Display},
    time::Duration,
};

use bon::bon;

use crate::error::ConfigError;

const DEFAULT_MAX_SIZE: usize = 100;
const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Controls when a batch gets flushed.
///
/// A batch is flushed as soon as it holds `max_size` items, or once no new item has arrived for
/// `idle_interval`, whichever happens first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct BatchConfig {
    pub(crate) max_size: usize,
    pub(crate) idle_interval: Duration,
}

#[bon]
impl BatchConfig {
    #[allow(missing_docs)]
    #[builder]
    pub fn new(
        /// The number of items that triggers a flush. Must be greater than zero.
        #[builder(default = DEFAULT_MAX_SIZE)]
        max_size: usize,
        /// How long the worker waits for another item before flushing a partial batch. Must be
        /// greater than zero.
        #[builder(default = DEFAULT_IDLE_INTERVAL)]
        idle_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if idle_interval.is_zero() {
            return Err(ConfigError::ZeroIdleInterval);
        }
        Ok(Self {
            max_size,
            idle_interval,
        })
    }

    /// The number of items that triggers a flush.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// How long to wait for another item before flushing a partial batch.
    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }
}

impl Display for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max_size: {}, idle_interval: {:?}",
            self.max_size, self.idle_interval
        )
    }
}
