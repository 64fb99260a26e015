//! In-memory storage implementation
//!
//! Used by tests and for dry runs. A single process-wide RwLock stands in
//! for SQLite's write lock, so the run lock is exclusive within a process.

use anyhow::{Result, anyhow};
use chrono::Utc;
use log::warn;
use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::MailStore;
use crate::models::{LabelAssignment, Message, MessageId, SyncState};

#[derive(Default)]
struct Tables {
    sync_state: Option<SyncState>,
    messages: HashMap<String, Message>,
    /// message id -> label names
    labels: HashMap<String, BTreeSet<String>>,
}

/// In-memory implementation of MailStore
#[derive(Default)]
pub struct InMemoryMailStore {
    tables: RwLock<Tables>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("In-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("In-memory store lock poisoned"))
    }
}

impl Tables {
    /// Stored state, if the run identified by `state` still holds the lock
    fn held_by(&mut self, state: &SyncState) -> Result<&mut SyncState> {
        match self.sync_state.as_mut() {
            Some(stored) if stored.running && stored.run_id == state.run_id => Ok(stored),
            _ => Err(anyhow!(
                "Sync lock for run {} is no longer held (taken over or reset)",
                state.run_id
            )),
        }
    }
}

impl MailStore for InMemoryMailStore {
    fn acquire_sync_lock(
        &self,
        stale_after: Option<chrono::Duration>,
    ) -> Result<Option<SyncState>> {
        let mut tables = self.write()?;
        let state = tables.sync_state.get_or_insert_with(SyncState::new);

        let now = Utc::now();
        if state.running {
            match stale_after {
                Some(limit) if state.is_stale(limit, now) => {
                    warn!(
                        "Taking over stale sync lock (started at {:?})",
                        state.started_at
                    );
                }
                _ => return Ok(None),
            }
        }

        state.begin_run(now);
        Ok(Some(state.clone()))
    }

    fn checkpoint_sync_state(&self, state: &SyncState) -> Result<()> {
        let mut tables = self.write()?;
        let stored = tables.held_by(state)?;

        stored.cursor = state.cursor.clone();
        stored.page_token = state.page_token.clone();
        stored.processed_count = state.processed_count;
        stored.last_error = state.last_error.clone();
        Ok(())
    }

    fn release_sync_lock(&self, state: &mut SyncState) -> Result<()> {
        let mut tables = self.write()?;
        let stored = tables.held_by(state)?;
        let now = Utc::now();
        stored.running = false;
        stored.finished_at = Some(now);

        state.running = false;
        state.finished_at = Some(now);
        Ok(())
    }

    fn get_sync_state(&self) -> Result<Option<SyncState>> {
        Ok(self.read()?.sync_state.clone())
    }

    fn reset_sync_lock(&self) -> Result<bool> {
        let mut tables = self.write()?;
        match tables.sync_state.as_mut() {
            Some(state) if state.running => {
                state.running = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn upsert_message(&self, message: &Message, labels: &[LabelAssignment]) -> Result<()> {
        let mut tables = self.write()?;
        let id = message.id.as_str().to_string();

        tables.messages.insert(id.clone(), message.clone());
        let assigned = tables.labels.entry(id).or_default();
        for label in labels {
            assigned.insert(label.label_name.clone());
        }
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.read()?.messages.get(id.as_str()).cloned())
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        Ok(self.read()?.messages.contains_key(id.as_str()))
    }

    fn list_labels_for_message(&self, id: &MessageId) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .labels
            .get(id.as_str())
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn count_messages(&self) -> Result<usize> {
        Ok(self.read()?.messages.len())
    }

    fn count_label_assignments(&self) -> Result<usize> {
        Ok(self.read()?.labels.values().map(BTreeSet::len).sum())
    }

    fn clear(&self) -> Result<()> {
        *self.write()? = Tables::default();
        Ok(())
    }
}
