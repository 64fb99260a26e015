//! Storage trait definitions

use crate::models::{LabelAssignment, Message, MessageId, SyncState};
use anyhow::Result;

/// Trait for mail storage operations
///
/// Covers the two things the sync engine persists: the singleton sync
/// state row (which doubles as the run lock) and the synced messages with
/// their label assignments.
pub trait MailStore: Send + Sync {
    // === Sync state & lock ===

    /// Take the run lock
    ///
    /// Creates the sync state row on first use. Returns `None` without
    /// modifying anything when another run holds the lock, unless that
    /// lock started more than `stale_after` ago, in which case it is taken
    /// over. On success the returned state is already committed with
    /// `running = true`, a fresh `started_at`, `processed_count = 0` and no
    /// `last_error`.
    fn acquire_sync_lock(
        &self,
        stale_after: Option<chrono::Duration>,
    ) -> Result<Option<SyncState>>;

    /// Persist progress fields (cursor, page token, processed count,
    /// last error) without touching the lock
    ///
    /// Fails without writing when the lock is no longer held by the run
    /// `state.run_id` (taken over as stale, or reset).
    fn checkpoint_sync_state(&self, state: &SyncState) -> Result<()>;

    /// Drop the run lock and stamp `finished_at`
    ///
    /// Updates `state` to match what was written. Fails without writing
    /// when the lock is no longer held by the run `state.run_id`.
    fn release_sync_lock(&self, state: &mut SyncState) -> Result<()>;

    /// Current sync state, `None` before the first run
    fn get_sync_state(&self) -> Result<Option<SyncState>>;

    /// Clear the lock regardless of who holds it
    ///
    /// Returns whether a lock was held. Used to recover from a process that
    /// died mid-run.
    fn reset_sync_lock(&self) -> Result<bool>;

    // === Messages ===

    /// Store a message and its label assignments
    ///
    /// The message row is overwritten when it exists; label assignments
    /// that already exist are left alone.
    fn upsert_message(&self, message: &Message, labels: &[LabelAssignment]) -> Result<()>;

    /// Get a message by ID
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Check if a message exists
    fn has_message(&self, id: &MessageId) -> Result<bool>;

    /// Label names assigned to a message, sorted
    fn list_labels_for_message(&self, id: &MessageId) -> Result<Vec<String>>;

    /// Count stored messages
    fn count_messages(&self) -> Result<usize>;

    /// Count stored label assignments
    fn count_label_assignments(&self) -> Result<usize>;

    /// Delete all messages, label assignments and the sync state
    fn clear(&self) -> Result<()>;
}
