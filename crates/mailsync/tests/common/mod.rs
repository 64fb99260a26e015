//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use base64::prelude::*;
use mailsync::gmail::api::{
    GmailLabel, GmailMessage, Header, HistoryRecord, HistoryResponse, MessageAdded, MessagePart,
    MessagePartBody, MessageRef,
};
use mailsync::{
    CancelFlag, LabelAssignment, MailStore, MailboxApi, Message, MessageId, MessagePage,
    RemoteError, RetryPolicy, Sleeper, SyncEngine, SyncOptions, SyncState,
};

/// Which remote call a scripted failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Labels,
    List,
    History,
}

#[derive(Default)]
struct Script {
    labels: Vec<GmailLabel>,
    /// Full-sync pages; page i is requested with token `p{i}` (page 0 with none)
    pages: Vec<Vec<String>>,
    full_history_id: Option<String>,
    /// History pages; page i is requested with token `h{i}` (page 0 with none)
    history: Vec<Vec<HistoryRecord>>,
    history_expired: bool,
    messages: HashMap<String, GmailMessage>,
    call_failures: HashMap<Call, VecDeque<RemoteError>>,
    message_failures: HashMap<String, VecDeque<RemoteError>>,
    /// Set when the first page is listed
    cancel_on_list: Option<CancelFlag>,
}

/// A scripted mailbox that records every call
#[derive(Default)]
pub struct FakeMailbox {
    script: Mutex<Script>,
    pub label_calls: AtomicUsize,
    list_calls: Mutex<Vec<Option<String>>>,
    history_calls: Mutex<Vec<(String, Option<String>)>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl FakeMailbox {
    pub fn new() -> Arc<Self> {
        let mailbox = Self::default();
        mailbox.script.lock().unwrap().labels = vec![
            label("INBOX", "INBOX"),
            label("UNREAD", "UNREAD"),
            label("Label_1", "Receipts"),
        ];
        Arc::new(mailbox)
    }

    /// Script a full mailbox listing; every ID gets a message
    pub fn set_pages(&self, pages: Vec<Vec<&str>>, history_id: &str) {
        let mut script = self.script.lock().unwrap();
        for id in pages.iter().flatten() {
            script
                .messages
                .entry(id.to_string())
                .or_insert_with(|| gmail_message(id, &["INBOX", "Label_1"]));
        }
        script.pages = pages
            .into_iter()
            .map(|ids| ids.into_iter().map(str::to_string).collect())
            .collect();
        script.full_history_id = Some(history_id.to_string());
    }

    /// Script history pages of (record id, added message ids)
    pub fn set_history(&self, pages: Vec<Vec<(&str, Vec<&str>)>>) {
        let mut script = self.script.lock().unwrap();
        for (_, ids) in pages.iter().flatten() {
            for id in ids {
                script
                    .messages
                    .entry(id.to_string())
                    .or_insert_with(|| gmail_message(id, &["INBOX", "UNREAD"]));
            }
        }
        script.history = pages
            .into_iter()
            .map(|records| {
                records
                    .into_iter()
                    .map(|(record_id, ids)| history_record(record_id, &ids))
                    .collect()
            })
            .collect();
    }

    pub fn set_history_expired(&self, expired: bool) {
        self.script.lock().unwrap().history_expired = expired;
    }

    pub fn put_message(&self, message: GmailMessage) {
        self.script
            .lock()
            .unwrap()
            .messages
            .insert(message.id.clone(), message);
    }

    pub fn remove_message(&self, id: &str) {
        self.script.lock().unwrap().messages.remove(id);
    }

    /// Fail the next `times` calls of `call` with `err`
    pub fn fail_call(&self, call: Call, err: RemoteError, times: usize) {
        let mut script = self.script.lock().unwrap();
        let queue = script.call_failures.entry(call).or_default();
        queue.extend(std::iter::repeat_n(err, times));
    }

    /// Fail the next `times` fetches of message `id` with `err`
    pub fn fail_message(&self, id: &str, err: RemoteError, times: usize) {
        let mut script = self.script.lock().unwrap();
        let queue = script.message_failures.entry(id.to_string()).or_default();
        queue.extend(std::iter::repeat_n(err, times));
    }

    pub fn cancel_on_list(&self, flag: CancelFlag) {
        self.script.lock().unwrap().cancel_on_list = Some(flag);
    }

    /// Page tokens passed to `list_message_ids`, in call order
    pub fn list_calls(&self) -> Vec<Option<String>> {
        self.list_calls.lock().unwrap().clone()
    }

    /// (start history id, page token) passed to `list_history`
    pub fn history_calls(&self) -> Vec<(String, Option<String>)> {
        self.history_calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        self.fetches.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    fn scripted_failure(&self, call: Call) -> Result<(), RemoteError> {
        let mut script = self.script.lock().unwrap();
        match script.call_failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn page_index(token: Option<&str>, prefix: char) -> Result<usize, RemoteError> {
    match token {
        None => Ok(0),
        Some(token) => token
            .strip_prefix(prefix)
            .and_then(|n| n.parse().ok())
            .ok_or(RemoteError::Status { code: 400 }),
    }
}

impl MailboxApi for FakeMailbox {
    fn list_labels(&self) -> Result<Vec<GmailLabel>, RemoteError> {
        self.label_calls.fetch_add(1, Ordering::SeqCst);
        self.scripted_failure(Call::Labels)?;
        Ok(self.script.lock().unwrap().labels.clone())
    }

    fn list_message_ids(
        &self,
        page_token: Option<&str>,
        _page_size: usize,
    ) -> Result<MessagePage, RemoteError> {
        self.list_calls
            .lock()
            .unwrap()
            .push(page_token.map(str::to_string));
        self.scripted_failure(Call::List)?;

        let script = self.script.lock().unwrap();
        if let Some(flag) = &script.cancel_on_list {
            flag.cancel();
        }

        let index = page_index(page_token, 'p')?;
        let ids = script
            .pages
            .get(index)
            .cloned()
            .ok_or(RemoteError::Status { code: 400 })?;

        Ok(MessagePage {
            message_ids: ids.into_iter().map(MessageId::new).collect(),
            next_page_token: (index + 1 < script.pages.len()).then(|| format!("p{}", index + 1)),
            history_id: match page_token {
                None => script.full_history_id.clone(),
                Some(_) => None,
            },
        })
    }

    fn get_message(&self, id: &MessageId) -> Result<GmailMessage, RemoteError> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(id.as_str().to_string())
            .or_default() += 1;

        let mut script = self.script.lock().unwrap();
        if let Some(err) = script
            .message_failures
            .get_mut(id.as_str())
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        script
            .messages
            .get(id.as_str())
            .cloned()
            .ok_or(RemoteError::Status { code: 404 })
    }

    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError> {
        self.history_calls
            .lock()
            .unwrap()
            .push((start_history_id.to_string(), page_token.map(str::to_string)));
        self.scripted_failure(Call::History)?;

        let script = self.script.lock().unwrap();
        if script.history_expired {
            return Err(RemoteError::Status { code: 404 });
        }

        let index = page_index(page_token, 'h')?;
        let records = script.history.get(index).cloned().unwrap_or_default();
        let next_page_token =
            (index + 1 < script.history.len()).then(|| format!("h{}", index + 1));

        Ok(HistoryResponse {
            history: Some(records),
            next_page_token,
            history_id: Some("999999".to_string()),
        })
    }
}

pub fn label(id: &str, name: &str) -> GmailLabel {
    GmailLabel {
        id: id.to_string(),
        name: name.to_string(),
        label_type: None,
    }
}

fn history_record(record_id: &str, ids: &[&str]) -> HistoryRecord {
    HistoryRecord {
        id: record_id.to_string(),
        messages_added: Some(
            ids.iter()
                .map(|id| MessageAdded {
                    message: MessageRef {
                        id: id.to_string(),
                        thread_id: Some(format!("t-{}", id)),
                    },
                })
                .collect(),
        ),
    }
}

/// A full-format message with headers and a text/plain body
pub fn gmail_message(id: &str, label_ids: &[&str]) -> GmailMessage {
    let header = |name: &str, value: &str| Header {
        name: name.to_string(),
        value: value.to_string(),
    };
    let body = format!("Body of {}", id);

    GmailMessage {
        id: id.to_string(),
        thread_id: format!("t-{}", id),
        label_ids: Some(label_ids.iter().map(|l| l.to_string()).collect()),
        history_id: None,
        payload: Some(MessagePart {
            mime_type: Some("text/plain".to_string()),
            headers: Some(vec![
                header("From", "alice@example.com"),
                header("To", "bob@example.com"),
                header("Subject", &format!("Subject {}", id)),
                header("Date", "Tue, 14 Jan 2025 09:30:00 +0000"),
            ]),
            body: Some(MessagePartBody {
                size: Some(body.len() as u32),
                data: Some(BASE64_URL_SAFE_NO_PAD.encode(&body)),
                attachment_id: None,
            }),
            ..Default::default()
        }),
    }
}

/// Records requested delays instead of sleeping
#[derive(Default)]
pub struct RecordingSleeper(Mutex<Vec<Duration>>);

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

/// Store wrapper that counts lock operations and can simulate a crash
///
/// With `crash_at_checkpoint(n)`, the n-th checkpoint fails and every call
/// after it fails too, as if the process had died at that point. With
/// `taken_over_at_checkpoint(n)`, another holder takes the lock over just
/// before the n-th checkpoint; its state is kept in `usurper`.
pub struct FaultyStore {
    inner: Arc<dyn MailStore>,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub checkpoints: AtomicUsize,
    crash_at: Option<usize>,
    takeover_at: Option<usize>,
    pub usurper: Mutex<Option<SyncState>>,
    dead: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn MailStore>) -> Self {
        Self {
            inner,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            checkpoints: AtomicUsize::new(0),
            crash_at: None,
            takeover_at: None,
            usurper: Mutex::new(None),
            dead: AtomicBool::new(false),
        }
    }

    pub fn crash_at_checkpoint(mut self, n: usize) -> Self {
        self.crash_at = Some(n);
        self
    }

    pub fn taken_over_at_checkpoint(mut self, n: usize) -> Self {
        self.takeover_at = Some(n);
        self
    }

    fn alive(&self) -> Result<()> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(anyhow!("store unavailable"));
        }
        Ok(())
    }
}

impl MailStore for FaultyStore {
    fn acquire_sync_lock(
        &self,
        stale_after: Option<chrono::Duration>,
    ) -> Result<Option<SyncState>> {
        self.alive()?;
        let state = self.inner.acquire_sync_lock(stale_after)?;
        if state.is_some() {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
        Ok(state)
    }

    fn checkpoint_sync_state(&self, state: &SyncState) -> Result<()> {
        self.alive()?;
        let n = self.checkpoints.fetch_add(1, Ordering::SeqCst) + 1;
        if self.crash_at == Some(n) {
            self.dead.store(true, Ordering::SeqCst);
            return Err(anyhow!("simulated crash at checkpoint {}", n));
        }
        if self.takeover_at == Some(n) {
            let taken = self
                .inner
                .acquire_sync_lock(Some(chrono::Duration::seconds(-1)))?;
            *self.usurper.lock().unwrap() = taken;
        }
        self.inner.checkpoint_sync_state(state)
    }

    fn release_sync_lock(&self, state: &mut SyncState) -> Result<()> {
        self.alive()?;
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release_sync_lock(state)
    }

    fn get_sync_state(&self) -> Result<Option<SyncState>> {
        self.alive()?;
        self.inner.get_sync_state()
    }

    fn reset_sync_lock(&self) -> Result<bool> {
        self.alive()?;
        self.inner.reset_sync_lock()
    }

    fn upsert_message(&self, message: &Message, labels: &[LabelAssignment]) -> Result<()> {
        self.alive()?;
        self.inner.upsert_message(message, labels)
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        self.inner.get_message(id)
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        self.inner.has_message(id)
    }

    fn list_labels_for_message(&self, id: &MessageId) -> Result<Vec<String>> {
        self.inner.list_labels_for_message(id)
    }

    fn count_messages(&self) -> Result<usize> {
        self.inner.count_messages()
    }

    fn count_label_assignments(&self) -> Result<usize> {
        self.inner.count_label_assignments()
    }

    fn clear(&self) -> Result<()> {
        self.alive()?;
        self.inner.clear()
    }
}

/// Engine with a recording sleeper and small fetch pool
pub fn build_engine(
    api: Arc<FakeMailbox>,
    store: Arc<dyn MailStore>,
) -> (SyncEngine, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let options = SyncOptions {
        concurrency: 4,
        retry: RetryPolicy::new(5, Duration::from_secs(1)).with_sleeper(sleeper.clone()),
        ..Default::default()
    };
    let engine = SyncEngine::new(api, store, options).unwrap();
    (engine, sleeper)
}

/// Commit a cursor as if a previous run had finished at `cursor`
pub fn seed_cursor(store: &dyn MailStore, cursor: &str) {
    let mut state = store.acquire_sync_lock(None).unwrap().unwrap();
    state.cursor = Some(cursor.to_string());
    store.checkpoint_sync_state(&state).unwrap();
    store.release_sync_lock(&mut state).unwrap();
}

pub fn sync_state(store: &dyn MailStore) -> SyncState {
    store.get_sync_state().unwrap().unwrap()
}
