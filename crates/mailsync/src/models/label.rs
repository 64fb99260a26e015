//! Label assignments on synced messages

use serde::{Deserialize, Serialize};

use super::MessageId;

/// A label attached to a stored message, keyed by (message, label name)
///
/// Assignments are set-like: storing the same pair twice keeps one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelAssignment {
    pub message_id: MessageId,
    /// Resolved display name, or the raw label ID when it could not be resolved
    pub label_name: String,
}

impl LabelAssignment {
    pub fn new(message_id: MessageId, label_name: impl Into<String>) -> Self {
        Self {
            message_id,
            label_name: label_name.into(),
        }
    }
}
