use super::message::{build_rfc822, clean_message_id, make_snippet, parse_address_list, parse_sender};
use super::{
    FetchRequest, MailProvider, OutgoingMessage, ProviderError, ProviderResult, RemoteAttachment,
    RemoteMessage, SentReceipt, ensure_success,
};
use crate::models::{Folder, ProviderKind};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::json;

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const LIST_PAGE_SIZE: usize = 500;

/// Gmail REST v1 client authorised by a bearer token.
pub struct GmailProvider {
    http: reqwest::Client,
    access_token: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    thread_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    thread_id: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    internal_date: Option<String>,
    payload: Option<GmailPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<GmailHeader>,
    body: Option<GmailBody>,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailBody {
    data: Option<String>,
    #[serde(default)]
    size: i64,
    attachment_id: Option<String>,
}

impl GmailPart {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn collect_parts(
    part: &GmailPart,
    text: &mut Option<String>,
    html: &mut Option<String>,
    attachments: &mut Vec<RemoteAttachment>,
) {
    let body = part.body.as_ref();
    if !part.filename.is_empty() {
        attachments.push(RemoteAttachment {
            filename: part.filename.clone(),
            mime_type: part.mime_type.clone(),
            size: body.map(|b| b.size).unwrap_or(0),
            provider_attachment_id: body.and_then(|b| b.attachment_id.clone()),
        });
        return;
    }

    let data = body.and_then(|b| b.data.as_deref());
    match part.mime_type.as_str() {
        "text/plain" if text.is_none() => *text = data.and_then(decode_body),
        "text/html" if html.is_none() => *html = data.and_then(decode_body),
        _ => {}
    }
    for sub in &part.parts {
        collect_parts(sub, text, html, attachments);
    }
}

fn folder_from_labels(labels: &[String]) -> Folder {
    let has = |name: &str| labels.iter().any(|l| l == name);
    if has("TRASH") {
        Folder::Trash
    } else if has("INBOX") {
        Folder::Inbox
    } else if has("SENT") {
        Folder::Sent
    } else {
        Folder::Archive
    }
}

fn category_from_labels(labels: &[String]) -> Option<String> {
    labels
        .iter()
        .find_map(|l| l.strip_prefix("CATEGORY_"))
        .map(|c| c.to_ascii_lowercase())
}

fn into_remote(message: GmailMessage) -> RemoteMessage {
    let payload = message.payload.unwrap_or_default();
    let (from_name, from_email) = payload
        .header("From")
        .map(parse_sender)
        .unwrap_or((None, String::new()));

    let mut text = None;
    let mut html = None;
    let mut attachments = Vec::new();
    collect_parts(&payload, &mut text, &mut html, &mut attachments);

    let snippet = if message.snippet.is_empty() {
        text.as_deref().map(make_snippet).unwrap_or_default()
    } else {
        message.snippet.clone()
    };
    let received_at = message
        .internal_date
        .as_deref()
        .and_then(|d| d.parse::<i64>().ok())
        .unwrap_or_else(crate::models::now_millis);

    RemoteMessage {
        provider_id: message.id,
        thread_id: message.thread_id,
        message_id: payload.header("Message-ID").and_then(clean_message_id),
        in_reply_to: payload.header("In-Reply-To").and_then(clean_message_id),
        from_name,
        from_email,
        to: payload.header("To").map(parse_address_list).unwrap_or_default(),
        cc: payload.header("Cc").map(parse_address_list).unwrap_or_default(),
        subject: payload.header("Subject").unwrap_or_default().to_string(),
        snippet,
        body_text: text,
        body_html: html,
        received_at,
        is_read: !message.label_ids.iter().any(|l| l == "UNREAD"),
        is_starred: message.label_ids.iter().any(|l| l == "STARRED"),
        folder: folder_from_labels(&message.label_ids),
        category: category_from_labels(&message.label_ids),
        has_list_unsubscribe: payload.header("List-Unsubscribe").is_some(),
        attachments,
    }
}

impl GmailProvider {
    pub fn new(http: reqwest::Client, access_token: String) -> Self {
        Self {
            http,
            access_token,
            base_url: GMAIL_API.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn modify_labels(&self, remote_id: &str, add: &[&str], remove: &[&str]) -> ProviderResult<()> {
        let response = self
            .http
            .post(self.url(&format!("messages/{remote_id}/modify")))
            .bearer_auth(&self.access_token)
            .json(&json!({ "addLabelIds": add, "removeLabelIds": remove }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Message ids newest first. `max` stops after that many; otherwise every
    /// page is followed.
    async fn list_ids(&self, since: Option<i64>, max: Option<usize>) -> ProviderResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_size = max.map_or(LIST_PAGE_SIZE, |max| (max - ids.len()).min(LIST_PAGE_SIZE));
            let mut query = vec![("maxResults", page_size.to_string())];
            if let Some(since) = since {
                query.push(("q", format!("after:{}", since / 1000)));
            }
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .http
                .get(self.url("messages"))
                .query(&query)
                .bearer_auth(&self.access_token)
                .send()
                .await?;
            let listed: ListResponse = ensure_success(response).await?.json().await?;
            ids.extend(listed.messages.into_iter().map(|m| m.id));

            page_token = listed.next_page_token;
            if page_token.is_none() || max.is_some_and(|max| ids.len() >= max) {
                break;
            }
        }
        Ok(ids)
    }

    async fn get_message(&self, id: &str) -> ProviderResult<GmailMessage> {
        let response = self
            .http
            .get(self.url(&format!("messages/{id}")))
            .query(&[("format", "full")])
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

#[rocket::async_trait]
impl MailProvider for GmailProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    async fn send(&self, message: &OutgoingMessage) -> ProviderResult<SentReceipt> {
        let built = build_rfc822(message)?;
        let payload = SendRequest {
            raw: URL_SAFE_NO_PAD.encode(built.formatted()),
            thread_id: message.thread_id.clone(),
        };
        let response = self
            .http
            .post(self.url("messages/send"))
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        let sent: MessageRef = ensure_success(response).await?.json().await?;
        Ok(SentReceipt {
            provider_id: Some(sent.id),
            thread_id: sent.thread_id,
            message_id: None,
        })
    }

    async fn fetch_messages(&self, request: FetchRequest) -> ProviderResult<Vec<RemoteMessage>> {
        let limit = request.limit.max(1);
        let ids = match request.since {
            None => self.list_ids(None, Some(limit)).await?,
            Some(since) => {
                // Listing is newest first, so the oldest page is the tail.
                let mut ids = self.list_ids(Some(since), None).await?;
                let start = ids.len().saturating_sub(limit);
                let mut oldest = ids.split_off(start);
                oldest.reverse();
                oldest
            }
        };

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_message(&id).await {
                Ok(message) => messages.push(into_remote(message)),
                Err(ProviderError::Auth(reason)) => return Err(ProviderError::Auth(reason)),
                Err(e) => log::warn!("gmail: skipping message {}: {}", id, e),
            }
        }
        Ok(messages)
    }

    async fn set_read(&self, remote_id: &str, read: bool) -> ProviderResult<()> {
        if read {
            self.modify_labels(remote_id, &[], &["UNREAD"]).await
        } else {
            self.modify_labels(remote_id, &["UNREAD"], &[]).await
        }
    }

    async fn set_starred(&self, remote_id: &str, starred: bool) -> ProviderResult<()> {
        if starred {
            self.modify_labels(remote_id, &["STARRED"], &[]).await
        } else {
            self.modify_labels(remote_id, &[], &["STARRED"]).await
        }
    }

    async fn archive(&self, remote_id: &str) -> ProviderResult<()> {
        self.modify_labels(remote_id, &[], &["INBOX"]).await
    }

    async fn trash(&self, remote_id: &str) -> ProviderResult<()> {
        let response = self
            .http
            .post(self.url(&format!("messages/{remote_id}/trash")))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GmailMessage {
        let body = URL_SAFE_NO_PAD.encode("Lunch on Friday?");
        serde_json::from_value(json!({
            "id": "18c1",
            "threadId": "t-9",
            "labelIds": ["INBOX", "UNREAD", "CATEGORY_PERSONAL"],
            "snippet": "",
            "internalDate": "1741082400000",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    {"name": "From", "value": "Ann <ann@gmail.com>"},
                    {"name": "To", "value": "me@hamba.dev"},
                    {"name": "Subject", "value": "Lunch"},
                    {"name": "Message-Id", "value": "<m1@mail.gmail.com>"}
                ],
                "parts": [
                    {"mimeType": "text/plain", "body": {"data": body, "size": 16}},
                    {"mimeType": "image/png", "filename": "map.png",
                     "body": {"attachmentId": "att-1", "size": 2048}}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn converts_full_message() {
        let remote = into_remote(sample());
        assert_eq!(remote.provider_id, "18c1");
        assert_eq!(remote.thread_id.as_deref(), Some("t-9"));
        assert_eq!(remote.from_name.as_deref(), Some("Ann"));
        assert_eq!(remote.from_email, "ann@gmail.com");
        assert_eq!(remote.message_id.as_deref(), Some("m1@mail.gmail.com"));
        assert_eq!(remote.body_text.as_deref(), Some("Lunch on Friday?"));
        assert_eq!(remote.snippet, "Lunch on Friday?");
        assert_eq!(remote.received_at, 1_741_082_400_000);
        assert!(!remote.is_read);
        assert_eq!(remote.folder, Folder::Inbox);
        assert_eq!(remote.category.as_deref(), Some("personal"));
        assert_eq!(remote.attachments.len(), 1);
        assert_eq!(remote.attachments[0].provider_attachment_id.as_deref(), Some("att-1"));
    }

    #[test]
    fn trash_label_wins_over_inbox() {
        let labels = vec!["INBOX".to_string(), "TRASH".to_string()];
        assert_eq!(folder_from_labels(&labels), Folder::Trash);
        assert_eq!(folder_from_labels(&[]), Folder::Archive);
    }
}
