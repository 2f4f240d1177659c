//! Gmail v1 adapter: message search and retrieval

use async_trait::async_trait;
use chrono::DateTime;
use futures::stream::{self, StreamExt, TryStreamExt};
use google_gmail1::api::{Message, MessagePart};
use google_gmail1::Gmail;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::credentials::TokenSource;
use crate::error::{GctlError, Result};
use crate::http::{hub_url, Connector, HttpClient};
use crate::models::{Email, MessageSummary, ResultPage};
use crate::search::RemoteCollection;

/// Generated Gmail hub over the shared TLS connector
pub type Hub = Gmail<Connector>;

pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/";

/// Gmail caps `maxResults` at 500
pub const MAX_PAGE_SIZE: usize = 500;

/// Default number of metadata fetches in flight per page
pub const DEFAULT_METADATA_CONCURRENCY: usize = 10;

const METADATA_HEADERS: &[&str] = &["From", "To", "Subject", "Date"];

fn header(part: &MessagePart, name: &str) -> String {
    part.headers
        .iter()
        .flatten()
        .find(|h| h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
        .and_then(|h| h.value.clone())
        .unwrap_or_default()
}

fn body_text(part: &MessagePart) -> Option<String> {
    part.body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .filter(|d| !d.is_empty())
        .map(|d| String::from_utf8_lossy(d).into_owned())
}

fn into_summary(message: Message, fallback_thread_id: &str) -> MessageSummary {
    let payload = message.payload.unwrap_or_default();
    let thread_id = message
        .thread_id
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback_thread_id.to_string());
    MessageSummary {
        id: message.id.unwrap_or_default(),
        thread_id,
        from: header(&payload, "From"),
        to: header(&payload, "To"),
        subject: header(&payload, "Subject"),
        snippet: message.snippet.unwrap_or_default(),
        date: message.internal_date.and_then(DateTime::from_timestamp_millis),
    }
}

/// Top-level body followed by every direct text/plain or text/html part
fn into_email(message: Message) -> Email {
    let payload = message.payload.unwrap_or_default();
    let mut body = body_text(&payload).unwrap_or_default();
    for part in payload.parts.iter().flatten() {
        if matches!(part.mime_type.as_deref(), Some("text/plain" | "text/html")) {
            if let Some(text) = body_text(part) {
                body.push_str(&text);
            }
        }
    }
    Email {
        id: message.id.unwrap_or_default(),
        from: header(&payload, "From"),
        to: header(&payload, "To"),
        subject: header(&payload, "Subject"),
        body,
        date: message.internal_date.and_then(DateTime::from_timestamp_millis),
    }
}

/// The signed-in user's mailbox as a searchable collection
#[derive(Clone)]
pub struct GmailCollection {
    http: HttpClient,
    tokens: TokenSource,
    base_url: String,
    concurrency: usize,
}

impl GmailCollection {
    pub fn new(http: HttpClient, tokens: TokenSource, base_url: impl AsRef<str>) -> Self {
        Self {
            http,
            tokens,
            base_url: hub_url(base_url.as_ref()),
            concurrency: DEFAULT_METADATA_CONCURRENCY,
        }
    }

    /// Set how many metadata fetches run at once within a page
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn hub(&self, cancel: &CancellationToken) -> Result<Hub> {
        let token = self.tokens.token(cancel).await?;
        let mut hub = Gmail::new(self.http.api_client(), token);
        hub.base_url(self.base_url.clone());
        Ok(hub)
    }

    /// Fetch one message with its decoded body
    pub async fn get_message(&self, id: &str, cancel: &CancellationToken) -> Result<Email> {
        let hub = self.hub(cancel).await?;
        let call = hub.users().messages_get("me", id).format("full").doit();
        let message = self.fetch_message(id, call, cancel).await?;
        Ok(into_email(message))
    }

    async fn fetch_metadata(
        &self,
        hub: &Hub,
        id: &str,
        thread_id: &str,
        cancel: &CancellationToken,
    ) -> Result<MessageSummary> {
        let mut call = hub.users().messages_get("me", id).format("metadata");
        for name in METADATA_HEADERS {
            call = call.add_metadata_headers(name);
        }
        let message = self.fetch_message(id, call.doit(), cancel).await?;
        Ok(into_summary(message, thread_id))
    }

    /// Await a message call, tagging failures with the message id
    async fn fetch_message<F, R>(&self, id: &str, call: F, cancel: &CancellationToken) -> Result<Message>
    where
        F: Future<Output = std::result::Result<(R, Message), google_gmail1::Error>>,
    {
        self.http
            .call("get message", call, cancel)
            .await
            .map_err(|e| match e {
                GctlError::RemoteError(remote) => remote.for_resource(id).into(),
                GctlError::InvalidResponse(reason) => {
                    GctlError::InvalidResponse(format!("message {}: {}", id, reason))
                }
                other => other,
            })
    }
}

#[async_trait]
impl RemoteCollection for GmailCollection {
    type Item = MessageSummary;

    fn name(&self) -> &'static str {
        "gmail"
    }

    fn max_page_size(&self) -> usize {
        MAX_PAGE_SIZE
    }

    async fn fetch_page(
        &self,
        query: &str,
        page_size: usize,
        page_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResultPage<MessageSummary>> {
        let hub = self.hub(cancel).await?;
        let mut call = hub
            .users()
            .messages_list("me")
            .max_results(page_size.min(MAX_PAGE_SIZE) as u32);
        if !query.is_empty() {
            call = call.q(query);
        }
        if let Some(token) = page_token {
            call = call.page_token(token);
        }

        let list = self.http.call("list messages", call.doit(), cancel).await?;
        let listed: Vec<(String, String)> = list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| Some((m.id?, m.thread_id.unwrap_or_default())))
            .collect();
        debug!(
            "Gmail listed {} messages, fetching metadata ({} at a time)",
            listed.len(),
            self.concurrency
        );

        // buffered keeps results in list order; the first failure ends the page
        let fetches: Vec<_> = listed
            .iter()
            .map(|(id, thread_id)| self.fetch_metadata(&hub, id, thread_id, cancel))
            .collect();
        let summaries: Vec<MessageSummary> = stream::iter(fetches)
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(ResultPage::new(summaries, list.next_page_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};

    fn headers(pairs: &[(&str, &str)]) -> Option<Vec<MessagePartHeader>> {
        Some(
            pairs
                .iter()
                .map(|(name, value)| MessagePartHeader {
                    name: Some(name.to_string()),
                    value: Some(value.to_string()),
                })
                .collect(),
        )
    }

    fn text_part(mime_type: &str, data: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime_type.to_string()),
            body: Some(MessagePartBody {
                data: Some(data.as_bytes().to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_metadata_message_to_summary() {
        let message = Message {
            id: Some("m1".to_string()),
            thread_id: Some("t1".to_string()),
            snippet: Some("Lunch tomorrow?".to_string()),
            internal_date: Some(1_704_164_645_000),
            payload: Some(MessagePart {
                headers: headers(&[
                    ("From", "alice@example.com"),
                    ("To", "bob@example.com"),
                    ("Subject", "Lunch"),
                    ("Date", "Tue, 2 Jan 2024 03:04:05 +0000"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let summary = into_summary(message, "ignored");

        assert_eq!(summary.id, "m1");
        assert_eq!(summary.thread_id, "t1");
        assert_eq!(summary.from, "alice@example.com");
        assert_eq!(summary.to, "bob@example.com");
        assert_eq!(summary.subject, "Lunch");
        assert_eq!(summary.snippet, "Lunch tomorrow?");
        assert_eq!(
            summary.date.unwrap().timestamp_millis(),
            1_704_164_645_000
        );
    }

    #[test]
    fn test_summary_falls_back_to_listed_thread_id() {
        let message = Message {
            id: Some("m2".to_string()),
            thread_id: Some(String::new()),
            ..Default::default()
        };
        let summary = into_summary(message, "t-list");
        assert_eq!(summary.thread_id, "t-list");
        assert_eq!(summary.subject, "");
        assert!(summary.date.is_none());
    }

    #[test]
    fn test_full_message_body_concatenates_text_parts() {
        let message = Message {
            id: Some("m3".to_string()),
            payload: Some(MessagePart {
                mime_type: Some("multipart/alternative".to_string()),
                headers: headers(&[("subject", "Mixed")]),
                body: Some(MessagePartBody {
                    data: Some(b"Hi ".to_vec()),
                    ..Default::default()
                }),
                parts: Some(vec![
                    text_part("text/plain", "plain"),
                    text_part("text/html", "<b>html</b>"),
                    MessagePart {
                        mime_type: Some("image/png".to_string()),
                        body: Some(MessagePartBody {
                            attachment_id: Some("att-1".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let email = into_email(message);

        assert_eq!(email.subject, "Mixed");
        assert_eq!(email.body, "Hi plain<b>html</b>");
    }

    #[test]
    fn test_nested_parts_are_not_flattened() {
        let nested = MessagePart {
            mime_type: Some("multipart/related".to_string()),
            parts: Some(vec![text_part("text/plain", "deep")]),
            ..Default::default()
        };
        let message = Message {
            id: Some("m4".to_string()),
            payload: Some(MessagePart {
                parts: Some(vec![nested, text_part("text/plain", "top")]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(into_email(message).body, "top");
    }
}
