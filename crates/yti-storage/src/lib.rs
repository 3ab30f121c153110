//! Storage backends, report spooling and API quota utilities for yti.

use std::time::Duration;

pub mod memory;
pub mod postgres;
pub mod rate_limit;
pub mod spool;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use spool::{DownloadedReport, ReportSpool, SpoolWriter};
pub use store::{
    BatchPutOutcome, Item, ItemKey, KeyValueStore, StoreError, TableSpec, MAX_BATCH_GET_KEYS,
    MAX_BATCH_WRITE_ITEMS,
};

pub const CRATE_NAME: &str = "yti-storage";

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}
