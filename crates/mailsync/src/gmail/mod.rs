//! Gmail API integration
//!
//! This module provides:
//! - The [`MailboxApi`] seam the sync engine consumes
//! - A blocking Gmail REST client implementing it
//! - Access token sources
//! - Response normalization to domain models

mod auth;
mod client;
mod normalize;

pub use auth::{StaticToken, StoredToken, StoredTokenFile, TokenProvider};
pub use client::GmailClient;
pub use normalize::{MAX_BODY_DEPTH, extract_plain_text, normalize_message, parse_date_header};

use crate::error::RemoteError;
use crate::models::MessageId;
use api::{GmailLabel, GmailMessage, HistoryResponse};

/// One page of message IDs from a full mailbox listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub message_ids: Vec<MessageId>,
    /// Token for the following page, `None` on the last page
    pub next_page_token: Option<String>,
    /// History ID the mailbox can be replayed from once paging completes.
    /// Only reported when the page carries a new value.
    pub history_id: Option<String>,
}

/// Remote mailbox operations used by the sync engine
///
/// Implementations perform exactly one remote request per call and never
/// retry; retry policy lives in [`crate::sync::RetryPolicy`].
pub trait MailboxApi: Send + Sync {
    /// List all label definitions (unpaginated)
    fn list_labels(&self) -> Result<Vec<GmailLabel>, RemoteError>;

    /// List one page of message IDs
    fn list_message_ids(
        &self,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage, RemoteError>;

    /// Fetch one full message (headers and body parts)
    fn get_message(&self, id: &MessageId) -> Result<GmailMessage, RemoteError>;

    /// List message-added history records after `start_history_id`
    ///
    /// A 404 means the history ID is too old to replay from.
    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError>;
}

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    use crate::models::MessageId;

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Full message from Gmail API (`format=full`)
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        pub history_id: Option<String>,
        pub payload: Option<MessagePart>,
    }

    /// A node of the MIME tree; the message payload is the root part
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessagePartBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Part body, base64url encoded
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePartBody {
        pub size: Option<u32>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// Response from listing labels
    #[derive(Debug, Deserialize)]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<GmailLabel>>,
    }

    /// Label definition
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct GmailLabel {
        pub id: String,
        pub name: String,
        #[serde(rename = "type")]
        pub label_type: Option<String>,
    }

    /// Response from the history endpoint
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    /// A single mailbox change record
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        pub messages_added: Option<Vec<MessageAdded>>,
    }

    impl HistoryRecord {
        /// IDs of the messages this record adds, in record order
        pub fn added_message_ids(&self) -> Vec<MessageId> {
            self.messages_added
                .iter()
                .flatten()
                .map(|added| MessageId::new(&added.message.id))
                .collect()
        }
    }

    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct MessageAdded {
        pub message: MessageRef,
    }

    /// Response from the profile endpoint
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: String,
        pub messages_total: Option<u64>,
        pub history_id: String,
    }
}
