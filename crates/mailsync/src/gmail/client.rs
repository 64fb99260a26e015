//! Gmail API HTTP client
//!
//! Blocking HTTP (ureq) so the client can be driven from the engine's
//! worker threads without an async runtime. Each method issues one request
//! and maps failures to [`RemoteError`]; retrying is the caller's job.

use log::debug;
use serde::de::DeserializeOwned;
use url::Url;

use super::api::{
    GmailLabel, GmailMessage, HistoryResponse, ListLabelsResponse, ListMessagesResponse,
    ProfileResponse,
};
use super::{MailboxApi, MessagePage, TokenProvider};
use crate::error::RemoteError;
use crate::models::MessageId;

/// Gmail API client
pub struct GmailClient {
    tokens: Box<dyn TokenProvider>,
    base_url: String,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1/users/me";

    /// Gmail rejects larger pages
    const MAX_PAGE_SIZE: usize = 500;

    pub fn new(tokens: Box<dyn TokenProvider>) -> Self {
        Self {
            tokens,
            base_url: Self::BASE_URL.to_string(),
        }
    }

    /// Point the client at another endpoint (e.g., a recording proxy)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, RemoteError> {
        let raw = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let parsed = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        parsed.map_err(|e| RemoteError::Request(e.to_string()))
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        let access_token = self
            .tokens
            .access_token()
            .map_err(|e| RemoteError::Auth(format!("{e:#}")))?;

        debug!("GET {}", url.path());
        let mut response = ureq::get(url.as_str())
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()?;

        Ok(response.body_mut().read_json::<T>()?)
    }

    /// Mailbox profile, including the current history ID
    pub fn get_profile(&self) -> Result<ProfileResponse, RemoteError> {
        self.get_json(self.url("profile", &[])?)
    }
}

impl MailboxApi for GmailClient {
    fn list_labels(&self) -> Result<Vec<GmailLabel>, RemoteError> {
        let response: ListLabelsResponse = self.get_json(self.url("labels", &[])?)?;
        Ok(response.labels.unwrap_or_default())
    }

    fn list_message_ids(
        &self,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage, RemoteError> {
        // Snapshot the history ID before the first page so messages that
        // arrive while paging are picked up by the next incremental run.
        let history_id = match page_token {
            None => Some(self.get_profile()?.history_id),
            Some(_) => None,
        };

        let max_results = page_size.clamp(1, Self::MAX_PAGE_SIZE).to_string();
        let mut params = vec![("maxResults", max_results.as_str())];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response: ListMessagesResponse = self.get_json(self.url("messages", &params)?)?;

        Ok(MessagePage {
            message_ids: response
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::new(m.id))
                .collect(),
            next_page_token: response.next_page_token,
            history_id,
        })
    }

    fn get_message(&self, id: &MessageId) -> Result<GmailMessage, RemoteError> {
        let path = format!("messages/{}", id.as_str());
        self.get_json(self.url(&path, &[("format", "full")])?)
    }

    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError> {
        let mut params = vec![
            ("startHistoryId", start_history_id),
            ("historyTypes", "messageAdded"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        self.get_json(self.url("history", &params)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::StaticToken;

    fn client() -> GmailClient {
        GmailClient::new(Box::new(StaticToken::new("token")))
    }

    #[test]
    fn test_url_encodes_params() {
        let url = client()
            .url("history", &[("startHistoryId", "12 34"), ("pageToken", "a&b")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gmail.googleapis.com/gmail/v1/users/me/history?startHistoryId=12+34&pageToken=a%26b"
        );
    }

    #[test]
    fn test_custom_base_url() {
        let url = client()
            .with_base_url("http://127.0.0.1:9000/gmail/")
            .url("labels", &[])
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/gmail/labels");
    }

    #[test]
    fn test_invalid_base_url_is_request_error() {
        let err = client().with_base_url("not a url").url("labels", &[]).unwrap_err();
        assert!(matches!(err, RemoteError::Request(_)));
    }
}
