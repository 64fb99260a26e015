//! Label ID to name resolution for a single sync run

use std::collections::HashMap;

use log::debug;

use super::RetryPolicy;
use crate::error::SyncError;
use crate::gmail::MailboxApi;
use crate::gmail::api::GmailLabel;
use crate::models::{LabelAssignment, Message};

/// Label names keyed by Gmail label ID
///
/// Fetched once at the start of a run and dropped with it. Labels renamed
/// while a run is in progress keep their old name until the next run.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    names: HashMap<String, String>,
}

impl LabelMap {
    /// List the mailbox's labels (one unpaginated call)
    pub fn fetch(api: &dyn MailboxApi, retry: &RetryPolicy) -> Result<Self, SyncError> {
        let labels = retry.call("list labels", || api.list_labels())?;
        debug!("Resolved {} labels", labels.len());
        Ok(Self::from_labels(labels))
    }

    pub fn from_labels(labels: impl IntoIterator<Item = GmailLabel>) -> Self {
        Self {
            names: labels.into_iter().map(|l| (l.id, l.name)).collect(),
        }
    }

    /// Display name for `id`, or `id` itself when unknown
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.names.get(id).map(String::as_str).unwrap_or(id)
    }

    /// One assignment per label on the message, deduplicated by name
    pub fn assignments(&self, message: &Message) -> Vec<LabelAssignment> {
        let mut assignments: Vec<LabelAssignment> = Vec::with_capacity(message.label_ids.len());
        for id in &message.label_ids {
            let name = self.resolve(id);
            if !assignments.iter().any(|a| a.label_name == name) {
                assignments.push(LabelAssignment::new(message.id.clone(), name));
            }
        }
        assignments
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, ThreadId};

    fn label(id: &str, name: &str) -> GmailLabel {
        GmailLabel {
            id: id.to_string(),
            name: name.to_string(),
            label_type: None,
        }
    }

    #[test]
    fn test_resolve_falls_back_to_id() {
        let map =
            LabelMap::from_labels(vec![label("INBOX", "INBOX"), label("Label_1", "Receipts")]);

        assert_eq!(map.len(), 2);
        assert_eq!(map.resolve("Label_1"), "Receipts");
        assert_eq!(map.resolve("Label_404"), "Label_404");
    }

    #[test]
    fn test_assignments() {
        let map = LabelMap::from_labels(vec![
            label("Label_1", "Receipts"),
            label("Label_2", "Receipts"),
        ]);
        let message = Message::builder(MessageId::new("m1"), ThreadId::new("t1"))
            .label_ids(vec![
                "INBOX".to_string(),
                "Label_1".to_string(),
                "Label_2".to_string(),
            ])
            .build();

        let names: Vec<String> = map
            .assignments(&message)
            .into_iter()
            .map(|a| a.label_name)
            .collect();
        assert_eq!(names, vec!["INBOX", "Receipts"]);
    }

    #[test]
    fn test_empty_map() {
        let map = LabelMap::default();
        assert!(map.is_empty());
        assert_eq!(map.resolve("STARRED"), "STARRED");
    }
}
