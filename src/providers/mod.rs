//! Uniform mail provider interface.
//!
//! Every backend (Gmail REST, Microsoft Graph, plain IMAP/SMTP and Yahoo,
//! which is IMAP with preset hosts) implements [`MailProvider`]. Routes, the
//! sync service and the outbox processors only ever talk to the trait; the
//! concrete client is picked per account by a [`ProviderFactory`].

pub mod gmail;
pub mod imap;
pub mod message;
pub mod microsoft;

use crate::config::HambaConfig;
use crate::models::{Account, Folder, ProviderKind};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use self::gmail::GmailProvider;
pub use self::imap::{ImapEndpoint, ImapProvider, ImapSession};
pub use self::microsoft::MicrosoftProvider;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised while talking to a mail provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("provider authentication failed: {0}")]
    Auth(String),
    #[error("provider protocol error: {0}")]
    Protocol(String),
    #[error("smtp error: {0}")]
    Smtp(String),
    #[error("invalid message: {0}")]
    Message(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("provider task failed: {0}")]
    Task(String),
}

impl ProviderError {
    pub fn status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            ProviderError::Auth(format!("{status}: {body}"))
        } else {
            ProviderError::Status { status, body }
        }
    }
}

/// Turn a non-2xx REST response into a [`ProviderError`], keeping the body for the logs.
pub(crate) async fn ensure_success(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::status(status, body))
    }
}

impl From<tokio::task::JoinError> for ProviderError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProviderError::Task(err.to_string())
    }
}

/// Message handed to a provider for delivery.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub from: String,
    pub from_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub thread_id: Option<String>,
}

/// Provider acknowledgement of a sent message.
#[derive(Debug, Clone, Default)]
pub struct SentReceipt {
    pub provider_id: Option<String>,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
}

/// Parameters for an incremental fetch.
///
/// Without `since` a provider returns the newest `limit` messages. With it,
/// the oldest `limit` messages received at or after `since`, so a caller can
/// walk forward through a backlog one page at a time.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest {
    pub since: Option<i64>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteAttachment {
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub provider_attachment_id: Option<String>,
}

/// Provider message normalised into the local shape.
#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub provider_id: String,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub from_name: Option<String>,
    pub from_email: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub snippet: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: i64,
    pub is_read: bool,
    pub is_starred: bool,
    pub folder: Folder,
    pub category: Option<String>,
    pub has_list_unsubscribe: bool,
    pub attachments: Vec<RemoteAttachment>,
}

/// Send, sync and mutate operations every provider exposes.
#[rocket::async_trait]
pub trait MailProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn send(&self, message: &OutgoingMessage) -> ProviderResult<SentReceipt>;

    async fn fetch_messages(&self, request: FetchRequest) -> ProviderResult<Vec<RemoteMessage>>;

    async fn set_read(&self, remote_id: &str, read: bool) -> ProviderResult<()>;

    async fn set_starred(&self, remote_id: &str, starred: bool) -> ProviderResult<()>;

    async fn archive(&self, remote_id: &str) -> ProviderResult<()>;

    async fn trash(&self, remote_id: &str) -> ProviderResult<()>;
}

/// Builds a provider client for an account.
pub trait ProviderFactory: Send + Sync {
    fn for_account(&self, account: &Account) -> ProviderResult<Arc<dyn MailProvider>>;
}

/// Dispatches on [`ProviderKind`] to the real network clients.
pub struct DefaultProviderFactory {
    http: reqwest::Client,
}

impl DefaultProviderFactory {
    pub fn new(config: &HambaConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("hamba/0.1")
            .build()?;
        Ok(Self { http })
    }
}

fn require_token(account: &Account) -> ProviderResult<String> {
    account
        .access_token
        .clone()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ProviderError::Auth(format!("account {} has no access token", account.email)))
}

impl ProviderFactory for DefaultProviderFactory {
    fn for_account(&self, account: &Account) -> ProviderResult<Arc<dyn MailProvider>> {
        match account.provider {
            ProviderKind::Gmail => Ok(Arc::new(GmailProvider::new(
                self.http.clone(),
                require_token(account)?,
            ))),
            ProviderKind::Microsoft => Ok(Arc::new(MicrosoftProvider::new(
                self.http.clone(),
                account.email.clone(),
                require_token(account)?,
            ))),
            ProviderKind::Imap | ProviderKind::Yahoo => {
                Ok(Arc::new(ImapProvider::new(ImapEndpoint::for_account(account)?)))
            }
        }
    }
}
