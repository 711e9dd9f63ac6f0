use super::message::{clean_message_id, make_snippet};
use super::{
    FetchRequest, MailProvider, OutgoingMessage, ProviderResult, RemoteMessage, SentReceipt,
    ensure_success,
};
use crate::models::{Folder, ProviderKind};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

const GRAPH_API: &str = "https://graph.microsoft.com/v1.0/me";

const MESSAGE_FIELDS: &str = "id,conversationId,internetMessageId,subject,bodyPreview,body,from,\
toRecipients,ccRecipients,receivedDateTime,isRead,flag,inferenceClassification,internetMessageHeaders";

/// Microsoft Graph mail client for Outlook and Microsoft 365 accounts.
pub struct MicrosoftProvider {
    http: reqwest::Client,
    account_email: String,
    access_token: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    conversation_id: Option<String>,
    internet_message_id: Option<String>,
    subject: Option<String>,
    #[serde(default)]
    body_preview: String,
    body: Option<GraphBody>,
    from: Option<Recipient>,
    #[serde(default)]
    to_recipients: Vec<Recipient>,
    #[serde(default)]
    cc_recipients: Vec<Recipient>,
    received_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    is_read: bool,
    flag: Option<Flag>,
    inference_classification: Option<String>,
    #[serde(default)]
    internet_message_headers: Vec<MessageHeader>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    content_type: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    name: Option<String>,
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Flag {
    flag_status: String,
}

#[derive(Debug, Deserialize)]
struct MessageHeader {
    name: String,
}

fn recipients(addresses: &[String]) -> Vec<Value> {
    addresses
        .iter()
        .map(|address| json!({ "emailAddress": { "address": address } }))
        .collect()
}

fn into_remote(message: GraphMessage) -> RemoteMessage {
    let (body_text, body_html) = match message.body {
        Some(body) if body.content_type.eq_ignore_ascii_case("html") => (None, Some(body.content)),
        Some(body) => (Some(body.content), None),
        None => (None, None),
    };
    let (from_name, from_email) = message
        .from
        .map(|r| (r.email_address.name, r.email_address.address))
        .unwrap_or((None, String::new()));
    let snippet = if message.body_preview.is_empty() {
        body_text.as_deref().map(make_snippet).unwrap_or_default()
    } else {
        make_snippet(&message.body_preview)
    };

    RemoteMessage {
        provider_id: message.id,
        thread_id: message.conversation_id,
        message_id: message.internet_message_id.as_deref().and_then(clean_message_id),
        in_reply_to: None,
        from_name,
        from_email,
        to: message
            .to_recipients
            .into_iter()
            .map(|r| r.email_address.address)
            .collect(),
        cc: message
            .cc_recipients
            .into_iter()
            .map(|r| r.email_address.address)
            .collect(),
        subject: message.subject.unwrap_or_default(),
        snippet,
        body_text,
        body_html,
        received_at: message
            .received_date_time
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(crate::models::now_millis),
        is_read: message.is_read,
        is_starred: message
            .flag
            .is_some_and(|f| f.flag_status.eq_ignore_ascii_case("flagged")),
        folder: Folder::Inbox,
        category: message.inference_classification,
        has_list_unsubscribe: message
            .internet_message_headers
            .iter()
            .any(|h| h.name.eq_ignore_ascii_case("List-Unsubscribe")),
        attachments: Vec::new(),
    }
}

impl MicrosoftProvider {
    pub fn new(http: reqwest::Client, account_email: String, access_token: String) -> Self {
        Self {
            http,
            account_email,
            access_token,
            base_url: GRAPH_API.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn patch_message(&self, remote_id: &str, body: Value) -> ProviderResult<()> {
        let response = self
            .http
            .patch(self.url(&format!("messages/{remote_id}")))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn move_to(&self, remote_id: &str, destination: &str) -> ProviderResult<()> {
        let response = self
            .http
            .post(self.url(&format!("messages/{remote_id}/move")))
            .bearer_auth(&self.access_token)
            .json(&json!({ "destinationId": destination }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[rocket::async_trait]
impl MailProvider for MicrosoftProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Microsoft
    }

    async fn send(&self, message: &OutgoingMessage) -> ProviderResult<SentReceipt> {
        let payload = json!({
            "message": {
                "subject": message.subject,
                "body": { "contentType": "Text", "content": message.body },
                "toRecipients": recipients(&message.to),
                "ccRecipients": recipients(&message.cc),
                "bccRecipients": recipients(&message.bcc),
            },
            "saveToSentItems": true,
        });
        let response = self
            .http
            .post(self.url("sendMail"))
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        ensure_success(response).await?;
        log::debug!("graph: sendMail accepted for {}", self.account_email);

        // sendMail answers 202 with no body, so there is no remote id to report.
        Ok(SentReceipt {
            provider_id: None,
            thread_id: message.thread_id.clone(),
            message_id: None,
        })
    }

    async fn fetch_messages(&self, request: FetchRequest) -> ProviderResult<Vec<RemoteMessage>> {
        let since = request.since.and_then(DateTime::<Utc>::from_timestamp_millis);
        let order = if since.is_some() { "receivedDateTime asc" } else { "receivedDateTime desc" };
        let mut query = vec![
            ("$top", request.limit.max(1).to_string()),
            ("$orderby", order.to_string()),
            ("$select", MESSAGE_FIELDS.to_string()),
        ];
        if let Some(since) = since {
            query.push((
                "$filter",
                format!(
                    "receivedDateTime ge {}",
                    since.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            ));
        }

        let response = self
            .http
            .get(self.url("mailFolders/inbox/messages"))
            .query(&query)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let page: MessagePage = ensure_success(response).await?.json().await?;
        Ok(page.value.into_iter().map(into_remote).collect())
    }

    async fn set_read(&self, remote_id: &str, read: bool) -> ProviderResult<()> {
        self.patch_message(remote_id, json!({ "isRead": read })).await
    }

    async fn set_starred(&self, remote_id: &str, starred: bool) -> ProviderResult<()> {
        let status = if starred { "flagged" } else { "notFlagged" };
        self.patch_message(remote_id, json!({ "flag": { "flagStatus": status } }))
            .await
    }

    async fn archive(&self, remote_id: &str) -> ProviderResult<()> {
        self.move_to(remote_id, "archive").await
    }

    async fn trash(&self, remote_id: &str) -> ProviderResult<()> {
        self.move_to(remote_id, "deleteditems").await
    }
}
