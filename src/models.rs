use chrono::Utc;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Current time as Unix epoch milliseconds, the unit every timestamp column uses.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Split a comma-separated address column into trimmed, non-empty entries.
pub fn split_addresses(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|addr| addr.trim())
        .filter(|addr| !addr.is_empty())
        .map(|addr| addr.to_string())
        .collect()
}

/// Join addresses into the comma-separated column representation.
pub fn join_addresses(addresses: &[String]) -> String {
    addresses
        .iter()
        .map(|addr| addr.trim())
        .filter(|addr| !addr.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

// ===== Generic Response Wrappers =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub page: i64,
    pub size: i64,
    pub total: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, page: i64, size: i64, total: i64) -> Self {
        Self {
            data,
            page,
            size,
            total,
        }
    }
}

// ===== Accounts =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gmail,
    Microsoft,
    Imap,
    Yahoo,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gmail => "gmail",
            ProviderKind::Microsoft => "microsoft",
            ProviderKind::Imap => "imap",
            ProviderKind::Yahoo => "yahoo",
        }
    }

    /// Providers reached over IMAP get push notifications through IDLE.
    pub fn supports_idle(self) -> bool {
        matches!(self, ProviderKind::Imap | ProviderKind::Yahoo)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gmail" | "google" => Ok(ProviderKind::Gmail),
            "microsoft" | "outlook" => Ok(ProviderKind::Microsoft),
            "imap" => Ok(ProviderKind::Imap),
            "yahoo" => Ok(ProviderKind::Yahoo),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub provider: ProviderKind,
    pub email: String,
    pub display_name: Option<String>,
    #[serde(skip_serializing, default)]
    pub access_token: Option<String>,
    #[serde(skip_serializing, default)]
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub imap_host: Option<String>,
    pub imap_port: Option<i64>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i64>,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    pub last_synced_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    /// `gmail`, `microsoft`, `imap` or `yahoo`; parsed by the route so an
    /// unknown value is a 400 rather than a body decode failure.
    pub provider: String,
    pub email: String,
    pub display_name: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub imap_host: Option<String>,
    pub imap_port: Option<i64>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i64>,
    pub username: Option<String>,
    pub password: Option<String>,
}

// ===== Emails =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Folder {
    Inbox,
    Sent,
    Archive,
    Trash,
}

impl Folder {
    pub fn as_str(self) -> &'static str {
        match self {
            Folder::Inbox => "inbox",
            Folder::Sent => "sent",
            Folder::Archive => "archive",
            Folder::Trash => "trash",
        }
    }
}

impl FromStr for Folder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbox" => Ok(Folder::Inbox),
            "sent" => Ok(Folder::Sent),
            "archive" | "archived" | "done" => Ok(Folder::Archive),
            "trash" => Ok(Folder::Trash),
            other => Err(format!("unknown folder '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: i64,
    pub account_id: i64,
    pub provider_id: String,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub from_name: Option<String>,
    pub from_email: String,
    pub to_addresses: String,
    pub cc_addresses: String,
    pub subject: String,
    pub snippet: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: i64,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_important: bool,
    pub is_sent: bool,
    pub has_list_unsubscribe: bool,
    pub category: Option<String>,
    pub folder: Folder,
    pub trashed_at: Option<i64>,
    pub created_at: i64,
}

/// List projection of an email without bodies.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailSummary {
    pub id: i64,
    pub account_id: i64,
    pub thread_id: Option<String>,
    pub from_name: Option<String>,
    pub from_email: String,
    pub to_addresses: String,
    pub subject: String,
    pub snippet: String,
    pub received_at: i64,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_important: bool,
    pub folder: Folder,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: i64,
    pub email_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub provider_attachment_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailUpdate {
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
}

// ===== Labels =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub color: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NewLabel {
    pub name: String,
    pub color: Option<String>,
}

// ===== Drafts =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub id: i64,
    pub account_id: i64,
    pub to_addresses: String,
    pub cc_addresses: String,
    pub bcc_addresses: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub thread_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DraftInput {
    pub account_id: i64,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub in_reply_to: Option<String>,
    pub thread_id: Option<String>,
}

// ===== Snippets =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub id: i64,
    pub shortcut: String,
    pub title: String,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SnippetInput {
    pub shortcut: String,
    pub title: String,
    pub body: String,
}

// ===== Contacts =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: i64,
    pub account_id: i64,
    pub email: String,
    pub name: Option<String>,
    pub contact_count: i64,
    pub last_contacted_at: Option<i64>,
}

// ===== Signatures =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub body: String,
    pub is_default: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInput {
    pub name: String,
    pub body: String,
    #[serde(default)]
    pub is_default: bool,
}

// ===== Outbox =====

/// A message waiting in either outbox table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: i64,
    pub account_id: i64,
    pub to_addresses: String,
    pub cc_addresses: String,
    pub bcc_addresses: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub thread_id: Option<String>,
    pub draft_id: Option<i64>,
    /// `send_at` for scheduled rows, `send_after` for pending rows.
    pub due_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComposeRequest {
    pub account_id: i64,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub in_reply_to: Option<String>,
    pub thread_id: Option<String>,
    pub draft_id: Option<i64>,
    /// Only read by the scheduling endpoint.
    pub send_at: Option<i64>,
}

impl ComposeRequest {
    /// Reject messages no provider would accept.
    pub fn validate(&self) -> Result<(), String> {
        if self.account_id <= 0 {
            return Err("accountId must be positive".to_string());
        }
        if self.to.iter().all(|addr| addr.trim().is_empty()) {
            return Err("at least one recipient is required".to_string());
        }
        for addr in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            let addr = addr.trim();
            if !addr.is_empty() && lettre::Address::from_str(addr).is_err() {
                return Err(format!("invalid recipient address '{addr}'"));
            }
        }
        Ok(())
    }
}
