//! SQLite-based mail storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use rusqlite_migration::{M, Migrations};

use super::traits::MailStore;
use crate::models::{LabelAssignment, Message, MessageId, SYNC_STATE_ID, SyncState, ThreadId};

/// How long a writer waits for another connection's write transaction
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Singleton sync state; `running` is the run lock
            CREATE TABLE sync_state (
                id TEXT PRIMARY KEY,
                cursor TEXT,
                page_token TEXT,
                running INTEGER NOT NULL DEFAULT 0,
                run_id INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                finished_at TEXT,
                processed_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );

            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                sender TEXT,
                recipient TEXT,
                subject TEXT,
                sent_at TEXT,
                body TEXT NOT NULL DEFAULT '',
                label_ids TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX idx_messages_thread_sent ON messages(thread_id, sent_at);

            -- Resolved label names per message (set semantics)
            CREATE TABLE message_labels (
                message_id TEXT NOT NULL,
                label_name TEXT NOT NULL,
                PRIMARY KEY (message_id, label_name),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_message_labels_name ON message_labels(label_name);
            "#,
        ),
    ])
}

/// SQLite-based mail storage
///
/// Each instance owns one connection. Separate instances (or processes)
/// opened on the same file coordinate through SQLite's write lock, which
/// is what makes the sync lock exclusive across processes.
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mainly for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL lets the status query read while a run is writing;
        // foreign_keys is required for ON DELETE CASCADE.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection mutex poisoned"))
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

fn load_sync_state(conn: &Connection) -> Result<Option<SyncState>> {
    let row = conn
        .query_row(
            "SELECT id, cursor, page_token, running, run_id, started_at, finished_at,
                    processed_count, last_error
             FROM sync_state WHERE id = ?",
            [SYNC_STATE_ID],
            |row| {
                Ok(SyncState {
                    id: row.get(0)?,
                    cursor: row.get(1)?,
                    page_token: row.get(2)?,
                    running: row.get(3)?,
                    run_id: row.get::<_, i64>(4)?.max(0) as u64,
                    started_at: parse_timestamp(row.get(5)?),
                    finished_at: parse_timestamp(row.get(6)?),
                    processed_count: row.get::<_, i64>(7)?.max(0) as u64,
                    last_error: row.get(8)?,
                })
            },
        )
        .optional()
        .context("Failed to read sync state")?;

    Ok(row)
}

fn lock_lost(state: &SyncState) -> anyhow::Error {
    anyhow!(
        "Sync lock for run {} is no longer held (taken over or reset)",
        state.run_id
    )
}

impl MailStore for SqliteMailStore {
    fn acquire_sync_lock(
        &self,
        stale_after: Option<chrono::Duration>,
    ) -> Result<Option<SyncState>> {
        let mut conn = self.conn()?;

        // IMMEDIATE takes the database write lock at BEGIN, so concurrent
        // acquirers (any connection, any process) run this one at a time.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin sync lock transaction")?;

        let mut state = match load_sync_state(&tx)? {
            Some(state) => state,
            None => {
                tx.execute(
                    "INSERT INTO sync_state (id, running, processed_count) VALUES (?, 0, 0)",
                    [SYNC_STATE_ID],
                )?;
                SyncState::new()
            }
        };

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
        tx.execute(
            "UPDATE sync_state
             SET running = 1, run_id = ?, started_at = ?, processed_count = 0, last_error = NULL
             WHERE id = ?",
            params![state.run_id as i64, now.to_rfc3339(), state.id],
        )?;
        tx.commit().context("Failed to commit sync lock")?;

        Ok(Some(state))
    }

    fn checkpoint_sync_state(&self, state: &SyncState) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE sync_state
                 SET cursor = ?, page_token = ?, processed_count = ?, last_error = ?
                 WHERE id = ? AND running = 1 AND run_id = ?",
                params![
                    state.cursor,
                    state.page_token,
                    state.processed_count as i64,
                    state.last_error,
                    state.id,
                    state.run_id as i64
                ],
            )
            .context("Failed to checkpoint sync state")?;

        if updated == 0 {
            return Err(lock_lost(state));
        }
        Ok(())
    }

    fn release_sync_lock(&self, state: &mut SyncState) -> Result<()> {
        let conn = self.conn()?;
        let now = Utc::now();
        let updated = conn
            .execute(
                "UPDATE sync_state SET running = 0, finished_at = ?
                 WHERE id = ? AND running = 1 AND run_id = ?",
                params![now.to_rfc3339(), state.id, state.run_id as i64],
            )
            .context("Failed to release sync lock")?;

        if updated == 0 {
            return Err(lock_lost(state));
        }

        state.running = false;
        state.finished_at = Some(now);
        Ok(())
    }

    fn get_sync_state(&self) -> Result<Option<SyncState>> {
        let conn = self.conn()?;
        load_sync_state(&conn)
    }

    fn reset_sync_lock(&self) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sync_state SET running = 0 WHERE id = ? AND running = 1",
            [SYNC_STATE_ID],
        )?;
        Ok(updated > 0)
    }

    fn upsert_message(&self, message: &Message, labels: &[LabelAssignment]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // ON CONFLICT DO UPDATE rather than INSERT OR REPLACE: REPLACE
        // deletes the old row first, which would cascade to its labels.
        tx.execute(
            "INSERT INTO messages
                (id, thread_id, sender, recipient, subject, sent_at, body, label_ids)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                thread_id = excluded.thread_id,
                sender = excluded.sender,
                recipient = excluded.recipient,
                subject = excluded.subject,
                sent_at = excluded.sent_at,
                body = excluded.body,
                label_ids = excluded.label_ids",
            params![
                message.id.as_str(),
                message.thread_id.as_str(),
                message.sender,
                message.recipient,
                message.subject,
                message.sent_at.map(|dt| dt.to_rfc3339()),
                message.body,
                serde_json::to_string(&message.label_ids)?,
            ],
        )
        .with_context(|| format!("Failed to store message {}", message.id))?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO message_labels (message_id, label_name) VALUES (?, ?)",
            )?;
            for label in labels {
                stmt.execute(params![label.message_id.as_str(), label.label_name])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, thread_id, sender, recipient, subject, sent_at, body, label_ids
                 FROM messages WHERE id = ?",
                [id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, thread_id, sender, recipient, subject, sent_at, body, label_ids)) = row
        else {
            return Ok(None);
        };

        let label_ids: Vec<String> = serde_json::from_str(&label_ids)
            .with_context(|| format!("Corrupt label_ids for message {}", id))?;

        Ok(Some(Message {
            id: MessageId::new(id),
            thread_id: ThreadId::new(thread_id),
            sender,
            recipient,
            subject,
            sent_at: parse_timestamp(sent_at),
            body,
            label_ids,
        }))
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?)",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn list_labels_for_message(&self, id: &MessageId) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT label_name FROM message_labels WHERE message_id = ? ORDER BY label_name",
        )?;
        let labels = stmt
            .query_map([id.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(labels)
    }

    fn count_messages(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn count_label_assignments(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM message_labels", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "DELETE FROM message_labels;
             DELETE FROM messages;
             DELETE FROM sync_state;",
        )?;
        Ok(())
    }
}
