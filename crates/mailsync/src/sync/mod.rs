//! Sync engine for fetching and storing mail
//!
//! Runs are idempotent: every message write is an upsert, so a page or
//! history record interrupted by a crash can simply be processed again.

mod batch;
mod engine;
mod labels;
mod retry;

pub use batch::{BatchStats, BatchStore, DEFAULT_CONCURRENCY};
pub use engine::{
    CancelFlag, DEFAULT_PAGE_SIZE, SyncEngine, SyncMode, SyncOptions, SyncOutcome, SyncStats,
};
pub use labels::LabelMap;
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper, classify, classify_history};
