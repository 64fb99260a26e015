//! Sync state tracking for the Gmail sync engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed key of the singleton sync state row
pub const SYNC_STATE_ID: &str = "gmail";

/// Progress and lock status of the sync engine
///
/// Exactly one row exists system-wide. `running` doubles as the run lock:
/// it is only flipped through the store's acquire/release operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub id: String,
    /// Gmail history ID up to which the mailbox is synced.
    /// `None` until a full sync has reported one.
    pub cursor: Option<String>,
    /// Page token of a full sync that has not finished paging
    pub page_token: Option<String>,
    pub running: bool,
    /// Bumped by every lock acquisition. Checkpoints and release only apply
    /// while the stored lock still carries the caller's `run_id`.
    #[serde(default)]
    pub run_id: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Messages handled by the current (or last) run
    pub processed_count: u64,
    pub last_error: Option<String>,
}

impl SyncState {
    /// A fresh, unlocked state with no cursor
    pub fn new() -> Self {
        Self {
            id: SYNC_STATE_ID.to_string(),
            cursor: None,
            page_token: None,
            running: false,
            run_id: 0,
            started_at: None,
            finished_at: None,
            processed_count: 0,
            last_error: None,
        }
    }

    /// Whether the next run must page through the whole mailbox
    pub fn needs_full_sync(&self) -> bool {
        self.cursor.is_none() || self.page_token.is_some()
    }

    /// Whether a running lock is older than `stale_after`
    pub fn is_stale(&self, stale_after: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.running
            && self
                .started_at
                .is_none_or(|started| now - started > stale_after)
    }

    /// Mark the state as locked for a new run
    pub(crate) fn begin_run(&mut self, now: DateTime<Utc>) {
        self.running = true;
        self.run_id += 1;
        self.started_at = Some(now);
        self.processed_count = 0;
        self.last_error = None;
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_sync_state() {
        let state = SyncState::new();
        assert_eq!(state.id, SYNC_STATE_ID);
        assert!(state.cursor.is_none());
        assert!(!state.running);
        assert_eq!(state.processed_count, 0);
        assert!(state.needs_full_sync());
    }

    #[test]
    fn test_needs_full_sync() {
        let mut state = SyncState::new();
        state.cursor = Some("100".to_string());
        assert!(!state.needs_full_sync());

        // Interrupted full sync keeps paging
        state.page_token = Some("page-2".to_string());
        assert!(state.needs_full_sync());
    }

    #[test]
    fn test_begin_run_resets_progress() {
        let mut state = SyncState::new();
        state.processed_count = 42;
        state.last_error = Some("boom".to_string());

        let now = Utc::now();
        state.begin_run(now);

        assert!(state.running);
        assert_eq!(state.run_id, 1);
        assert_eq!(state.started_at, Some(now));
        assert_eq!(state.processed_count, 0);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn test_is_stale() {
        let now = Utc::now();
        let mut state = SyncState::new();
        assert!(!state.is_stale(Duration::minutes(10), now));

        state.begin_run(now - Duration::minutes(30));
        assert!(state.is_stale(Duration::minutes(10), now));
        assert!(!state.is_stale(Duration::hours(1), now));
    }

    #[test]
    fn test_serialization() {
        let mut state = SyncState::new();
        state.cursor = Some("12345".to_string());
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
