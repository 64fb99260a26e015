//! Gmail API response normalization
//!
//! Converts Gmail API messages to stored [`Message`] rows. Normalization
//! never fails: missing or malformed fields degrade to `None` or an empty
//! body so one bad message cannot abort a batch.

use base64::prelude::*;
use chrono::{DateTime, NaiveDateTime, Utc};

use super::api::{GmailMessage, MessagePart};
use crate::models::{Message, MessageId, ThreadId};

/// How many multipart levels below the payload are searched for a
/// `text/plain` body. 1 = the payload itself and its direct children.
pub const MAX_BODY_DEPTH: usize = 1;

/// Zone-less date layouts, interpreted as UTC
const NAIVE_DATE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M",
];

/// Normalize a Gmail API message to a stored Message
pub fn normalize_message(gmail_msg: GmailMessage) -> Message {
    let payload = gmail_msg.payload.unwrap_or_default();

    let mut builder = Message::builder(
        MessageId::new(gmail_msg.id),
        ThreadId::new(gmail_msg.thread_id),
    )
    .sent_at(parse_date_header(extract_header(&payload, "Date")))
    .body(extract_plain_text(&payload))
    .label_ids(gmail_msg.label_ids.unwrap_or_default());

    if let Some(from) = extract_header(&payload, "From") {
        builder = builder.sender(from);
    }
    if let Some(to) = extract_header(&payload, "To") {
        builder = builder.recipient(to);
    }
    if let Some(subject) = extract_header(&payload, "Subject") {
        builder = builder.subject(subject);
    }

    builder.build()
}

/// Extract a header value by name
fn extract_header<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .as_ref()?
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Plain text body of a message, or an empty string
///
/// Prefers the payload itself when it is `text/plain`, then the first
/// `text/plain` part within [`MAX_BODY_DEPTH`] levels. Deeper parts are
/// not visited.
pub fn extract_plain_text(payload: &MessagePart) -> String {
    find_plain_text(payload, 0).unwrap_or_default()
}

fn find_plain_text(part: &MessagePart, depth: usize) -> Option<String> {
    if is_plain_text(part)
        && let Some(text) = part
            .body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .and_then(decode_base64_body)
    {
        return Some(text);
    }

    if depth >= MAX_BODY_DEPTH {
        return None;
    }

    part.parts
        .iter()
        .flatten()
        .find_map(|child| find_plain_text(child, depth + 1))
}

fn is_plain_text(part: &MessagePart) -> bool {
    part.mime_type
        .as_deref()
        .is_some_and(|m| m.to_ascii_lowercase().starts_with("text/plain"))
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders
        .iter()
        .find_map(|decoder| decoder.decode(data).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Parse a `Date` header into a UTC timestamp
///
/// Accepts RFC 2822 dates with or without a trailing comment such as
/// `(UTC)`. A date with no zone is taken as UTC. Anything else is `None`.
pub fn parse_date_header(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = strip_trailing_comment(value?.trim());
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn strip_trailing_comment(value: &str) -> &str {
    match value.rfind('(') {
        Some(idx) if value.ends_with(')') => value[..idx].trim_end(),
        _ => value,
    }
}
