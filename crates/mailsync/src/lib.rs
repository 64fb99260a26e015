//! mailsync - Incremental Gmail to SQLite sync engine
//!
//! This crate provides:
//! - Domain models (Message, LabelAssignment, SyncState)
//! - A blocking Gmail API client behind the [`MailboxApi`] trait
//! - Storage trait abstractions with SQLite and in-memory backends
//! - The sync engine: durable run lock, retry with backoff, bounded
//!   concurrent fetches, per-page and per-record checkpoints
//!
//! A driver (see the `mailsyncd` binary) builds a [`SyncEngine`] and calls
//! [`SyncEngine::run_once`] on a schedule.

pub mod config;
pub mod error;
pub mod gmail;
pub mod models;
pub mod storage;
pub mod sync;

pub use crate::config::SyncConfig;
pub use error::{ErrorClass, RemoteError, SyncError};
pub use gmail::{GmailClient, MailboxApi, MessagePage, TokenProvider};
pub use models::{LabelAssignment, Message, MessageId, SYNC_STATE_ID, SyncState, ThreadId};
pub use storage::{InMemoryMailStore, MailStore, SqliteMailStore};
pub use sync::{
    BatchStats, CancelFlag, LabelMap, RetryPolicy, Sleeper, SyncEngine, SyncMode, SyncOptions,
    SyncOutcome, SyncStats,
};
