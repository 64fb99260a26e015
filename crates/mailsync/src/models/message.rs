//! Message model representing a synced Gmail message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Gmail thread ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A message row as stored locally
///
/// Header fields are kept verbatim; a missing header is `None`.
/// Re-storing a message with the same id replaces every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Gmail message ID
    pub id: MessageId,
    /// ID of the thread this message belongs to
    pub thread_id: ThreadId,
    /// Raw `From` header
    pub sender: Option<String>,
    /// Raw `To` header
    pub recipient: Option<String>,
    /// `Subject` header
    pub subject: Option<String>,
    /// Parsed `Date` header, `None` when missing or unparsable
    pub sent_at: Option<DateTime<Utc>>,
    /// Plain text body, empty when the message has none
    pub body: String,
    /// Gmail label IDs on the message (e.g., "INBOX", "Label_12")
    pub label_ids: Vec<String>,
}

impl Message {
    /// Create a new message builder
    pub fn builder(id: MessageId, thread_id: ThreadId) -> MessageBuilder {
        MessageBuilder::new(id, thread_id)
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    fn new(id: MessageId, thread_id: ThreadId) -> Self {
        Self {
            message: Message {
                id,
                thread_id,
                sender: None,
                recipient: None,
                subject: None,
                sent_at: None,
                body: String::new(),
                label_ids: Vec::new(),
            },
        }
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.message.sender = Some(sender.into());
        self
    }

    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.message.recipient = Some(recipient.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.message.subject = Some(subject.into());
        self
    }

    pub fn sent_at(mut self, sent_at: Option<DateTime<Utc>>) -> Self {
        self.message.sent_at = sent_at;
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.message.body = body.into();
        self
    }

    pub fn label_ids(mut self, label_ids: Vec<String>) -> Self {
        self.message.label_ids = label_ids;
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}
