//! The sync orchestrator
//!
//! One call to [`SyncEngine::run_once`] is one sync cycle:
//!
//! 1. Take the durable run lock (or skip when another run holds it)
//! 2. Resolve label names
//! 3. Page through the whole mailbox (no cursor yet, or an unfinished full
//!    sync) or replay history records since the cursor
//! 4. After every page or record, checkpoint the processed count and then,
//!    in a separate commit, the new cursor
//! 5. Record any error and release the lock
//!
//! Pages and records are processed strictly one after another; a unit's
//! checkpoint must be durable before the next unit starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{error, info, warn};
use serde::Serialize;

use super::batch::{BatchStats, BatchStore, DEFAULT_CONCURRENCY};
use super::retry::classify_history;
use super::{LabelMap, RetryPolicy};
use crate::error::SyncError;
use crate::gmail::MailboxApi;
use crate::models::SyncState;
use crate::storage::MailStore;

/// Gmail's maximum page size for message listing
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Tuning for a [`SyncEngine`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Message IDs requested per full-sync page
    pub page_size: usize,
    /// Messages fetched concurrently within a page or record
    pub concurrency: usize,
    /// Take over a lock held longer than this; `None` never expires it
    pub stale_after: Option<chrono::Duration>,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            stale_after: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Cooperative shutdown signal, honored between pages and history records
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

/// Statistics from one sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Mode the run finished in
    pub mode: SyncMode,
    /// Pages or history records processed
    pub units: usize,
    pub messages_stored: usize,
    /// Messages deleted remotely before they could be fetched
    pub messages_skipped: usize,
    /// The history cursor had expired and the run fell back to a full sync
    pub cursor_reset: bool,
    pub duration_ms: u64,
}

impl SyncStats {
    fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            units: 0,
            messages_stored: 0,
            messages_skipped: 0,
            cursor_reset: false,
            duration_ms: 0,
        }
    }

    fn record(&mut self, batch: BatchStats) {
        self.units += 1;
        self.messages_stored += batch.stored;
        self.messages_skipped += batch.skipped;
    }
}

/// How a call to [`SyncEngine::run_once`] ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncStats),
    /// Another run holds the lock; nothing was done
    Skipped,
    /// Stopped early by the [`CancelFlag`]; progress so far is checkpointed
    Cancelled(SyncStats),
}

enum Flow {
    Done,
    Cancelled,
}

/// Holds the run lock and the last committed sync state
///
/// Releases the lock exactly once: through [`RunLock::release`] on normal
/// exits, or on drop if the run unwinds.
struct RunLock<'a> {
    store: &'a dyn MailStore,
    state: SyncState,
    released: bool,
}

impl RunLock<'_> {
    fn state(&self) -> &SyncState {
        &self.state
    }

    /// Apply `update` and checkpoint it
    ///
    /// The in-memory state only changes once the checkpoint has committed,
    /// so it always matches what is persisted.
    fn commit(&mut self, update: impl FnOnce(&mut SyncState)) -> Result<(), SyncError> {
        let mut next = self.state.clone();
        update(&mut next);
        self.store.checkpoint_sync_state(&next)?;
        self.state = next;
        Ok(())
    }

    fn record_error(&mut self, err: &SyncError) {
        let message = err.to_string();
        if let Err(e) = self.commit(|state| state.last_error = Some(message)) {
            error!("Failed to record sync error: {}", e);
        }
    }

    fn release(mut self) -> Result<SyncState, SyncError> {
        self.released = true;
        self.store.release_sync_lock(&mut self.state)?;
        Ok(self.state.clone())
    }
}

impl Drop for RunLock<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.store.release_sync_lock(&mut self.state) {
            error!("Failed to release sync lock: {:#}", e);
        }
    }
}

/// Incremental Gmail sync engine
pub struct SyncEngine {
    api: Arc<dyn MailboxApi>,
    store: Arc<dyn MailStore>,
    batch: BatchStore,
    options: SyncOptions,
    cancel: CancelFlag,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn MailboxApi>,
        store: Arc<dyn MailStore>,
        options: SyncOptions,
    ) -> anyhow::Result<Self> {
        let batch = BatchStore::new(
            api.clone(),
            store.clone(),
            options.retry.clone(),
            options.concurrency,
        )?;

        Ok(Self {
            api,
            store,
            batch,
            options,
            cancel: CancelFlag::new(),
        })
    }

    /// Use an externally owned cancel flag (e.g., one wired to Ctrl-C)
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Current sync state, `None` before the first run
    pub fn status(&self) -> anyhow::Result<Option<SyncState>> {
        self.store.get_sync_state()
    }

    /// Run one sync cycle
    ///
    /// Returns [`SyncOutcome::Skipped`] when another run holds the lock. On
    /// failure the error is written to the sync state's `last_error` before
    /// the lock is released and the error returned.
    pub fn run_once(&self) -> Result<SyncOutcome, SyncError> {
        let Some(state) = self.store.acquire_sync_lock(self.options.stale_after)? else {
            info!("Sync already running, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let mut lock = RunLock {
            store: self.store.as_ref(),
            state,
            released: false,
        };

        match self.drive(&mut lock) {
            Ok(outcome) => {
                let state = lock.release()?;
                match &outcome {
                    SyncOutcome::Completed(stats) => info!(
                        "Sync complete ({:?}): {} units, {} stored, {} skipped, cursor {:?} in {}ms",
                        stats.mode,
                        stats.units,
                        stats.messages_stored,
                        stats.messages_skipped,
                        state.cursor,
                        stats.duration_ms
                    ),
                    SyncOutcome::Cancelled(stats) => info!(
                        "Sync cancelled after {} units, cursor {:?}",
                        stats.units, state.cursor
                    ),
                    SyncOutcome::Skipped => {}
                }
                Ok(outcome)
            }
            Err(err) => {
                error!("Sync failed: {}", err);
                lock.record_error(&err);
                if let Err(e) = lock.release() {
                    error!("Failed to release sync lock: {}", e);
                }
                Err(err)
            }
        }
    }

    fn drive(&self, lock: &mut RunLock<'_>) -> Result<SyncOutcome, SyncError> {
        let started = Instant::now();
        let labels = LabelMap::fetch(self.api.as_ref(), &self.options.retry)?;

        let mut stats = SyncStats::new(SyncMode::Full);
        loop {
            let flow = match lock.state().cursor.clone() {
                Some(cursor) if !lock.state().needs_full_sync() => {
                    stats.mode = SyncMode::Incremental;
                    info!("Starting incremental sync from history {}", cursor);
                    self.incremental_sync(lock, &labels, &cursor, &mut stats)
                }
                _ => {
                    stats.mode = SyncMode::Full;
                    match &lock.state().page_token {
                        Some(_) => info!("Resuming full sync"),
                        None => info!("Starting full sync"),
                    }
                    self.full_sync(lock, &labels, &mut stats)
                }
            };

            match flow {
                Ok(flow) => {
                    stats.duration_ms = started.elapsed().as_millis() as u64;
                    return Ok(match flow {
                        Flow::Done => SyncOutcome::Completed(stats),
                        Flow::Cancelled => SyncOutcome::Cancelled(stats),
                    });
                }
                Err(SyncError::CursorExpired) if !stats.cursor_reset => {
                    warn!("History cursor expired, falling back to full sync");
                    stats.cursor_reset = true;
                    lock.commit(|state| {
                        state.cursor = None;
                        state.page_token = None;
                    })?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn full_sync(
        &self,
        lock: &mut RunLock<'_>,
        labels: &LabelMap,
        stats: &mut SyncStats,
    ) -> Result<Flow, SyncError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Flow::Cancelled);
            }

            let page_token = lock.state().page_token.clone();
            let page = self.options.retry.call("list messages", || {
                self.api.list_message_ids(page_token.as_deref(), self.options.page_size)
            })?;

            let batch = self.batch.store_messages(&page.message_ids, labels)?;
            stats.record(batch);

            let count = page.message_ids.len() as u64;
            lock.commit(|state| state.processed_count += count)?;
            lock.commit(|state| {
                if let Some(history_id) = page.history_id {
                    state.cursor = Some(history_id);
                }
                state.page_token = page.next_page_token;
            })?;

            info!(
                "Synced page {} ({} messages, {} total)",
                stats.units,
                count,
                lock.state().processed_count
            );

            if lock.state().page_token.is_none() {
                return Ok(Flow::Done);
            }
        }
    }

    fn incremental_sync(
        &self,
        lock: &mut RunLock<'_>,
        labels: &LabelMap,
        start_history_id: &str,
        stats: &mut SyncStats,
    ) -> Result<Flow, SyncError> {
        let mut page_token: Option<String> = None;
        let mut replayed = 0usize;
        loop {
            let response = self
                .options
                .retry
                .call_with("list history", classify_history, || {
                    self.api.list_history(start_history_id, page_token.as_deref())
                })?;

            for record in response.history.unwrap_or_default() {
                if self.cancel.is_cancelled() {
                    return Ok(Flow::Cancelled);
                }

                let ids = record.added_message_ids();
                let batch = self.batch.store_messages(&ids, labels)?;
                stats.record(batch);

                let count = ids.len() as u64;
                lock.commit(|state| state.processed_count += count)?;
                lock.commit(|state| state.cursor = Some(record.id))?;
                replayed += 1;
            }

            if let Some(token) = response.next_page_token {
                page_token = Some(token);
                continue;
            }

            // Nothing was added since the cursor: move it to the mailbox's
            // current history ID so it does not age into expiry.
            if replayed == 0 {
                let head = response
                    .history_id
                    .filter(|head| lock.state().cursor.as_deref() != Some(head.as_str()));
                if let Some(head) = head {
                    info!("No new messages, advancing cursor to {}", head);
                    lock.commit(|state| state.cursor = Some(head))?;
                }
            }
            return Ok(Flow::Done);
        }
    }
}
