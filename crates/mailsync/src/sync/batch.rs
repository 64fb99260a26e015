//! Concurrent fetch-and-store of a set of messages

use std::sync::Arc;

use anyhow::Context;
use log::{debug, warn};
use rayon::prelude::*;

use super::{LabelMap, RetryPolicy};
use crate::error::{RemoteError, SyncError};
use crate::gmail::{MailboxApi, normalize_message};
use crate::models::MessageId;
use crate::storage::MailStore;

/// Default number of messages fetched at once
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Result of storing one batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    /// Messages fetched and upserted
    pub stored: usize,
    /// Messages deleted remotely before they could be fetched
    pub skipped: usize,
}

enum Stored {
    Yes,
    Gone,
}

/// Fetches full messages on a fixed-width thread pool and upserts them
///
/// Messages within a batch complete in any order. Upserts are idempotent,
/// so re-running a batch after a crash is harmless.
pub struct BatchStore {
    api: Arc<dyn MailboxApi>,
    store: Arc<dyn MailStore>,
    retry: RetryPolicy,
    pool: rayon::ThreadPool,
}

impl BatchStore {
    pub fn new(
        api: Arc<dyn MailboxApi>,
        store: Arc<dyn MailStore>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> anyhow::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("mailsync-fetch-{}", i))
            .build()
            .context("Failed to build fetch thread pool")?;

        Ok(Self {
            api,
            store,
            retry,
            pool,
        })
    }

    /// Fetch, normalize and store every message in `ids`
    ///
    /// A message that no longer exists remotely (404) is skipped. Any other
    /// failure fails the batch once all in-flight fetches have finished;
    /// messages that did succeed stay stored.
    pub fn store_messages(
        &self,
        ids: &[MessageId],
        labels: &LabelMap,
    ) -> Result<BatchStats, SyncError> {
        if ids.is_empty() {
            return Ok(BatchStats::default());
        }

        let results: Vec<Result<Stored, SyncError>> = self
            .pool
            .install(|| ids.par_iter().map(|id| self.store_one(id, labels)).collect());

        let mut stats = BatchStats::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(Stored::Yes) => stats.stored += 1,
                Ok(Stored::Gone) => stats.skipped += 1,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    fn store_one(&self, id: &MessageId, labels: &LabelMap) -> Result<Stored, SyncError> {
        let gmail_msg = match self.retry.call("get message", || self.api.get_message(id)) {
            Ok(msg) => msg,
            Err(SyncError::Remote(RemoteError::Status { code: 404 })) => {
                warn!("Message {} no longer exists, skipping", id);
                return Ok(Stored::Gone);
            }
            Err(e) => return Err(e),
        };

        let message = normalize_message(gmail_msg);
        let assignments = labels.assignments(&message);
        self.store
            .upsert_message(&message, &assignments)
            .with_context(|| format!("Failed to store message {}", id))?;

        debug!("Stored message {} ({} labels)", id, assignments.len());
        Ok(Stored::Yes)
    }
}
