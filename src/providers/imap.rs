//! IMAP/SMTP provider. Also serves Yahoo, which is IMAP with preset hosts.
//!
//! The `imap` crate is blocking, so every session runs on
//! `tokio::task::spawn_blocking`. Outgoing mail goes through lettre's SMTP
//! transport, also blocking. A fresh connection is opened per call; the long
//! lived connection belongs to the IDLE watcher, not to this client.

use super::message::{build_rfc822, extract_body, header_fields, make_snippet};
use super::{
    FetchRequest, MailProvider, OutgoingMessage, ProviderError, ProviderResult, RemoteMessage,
    SentReceipt,
};
use crate::models::{Account, Folder, ProviderKind};
use chrono::{DateTime, Utc};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use native_tls::TlsStream;
use std::net::TcpStream;

pub type ImapSession = ::imap::Session<TlsStream<TcpStream>>;

const YAHOO_IMAP_HOST: &str = "imap.mail.yahoo.com";
const YAHOO_SMTP_HOST: &str = "smtp.mail.yahoo.com";
const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_SMTP_PORT: u16 = 465;
const INBOX: &str = "INBOX";
const ARCHIVE_MAILBOX: &str = "Archive";
const TRASH_MAILBOX: &str = "Trash";

impl From<::imap::error::Error> for ProviderError {
    fn from(err: ::imap::error::Error) -> Self {
        match err {
            ::imap::error::Error::No(reason) => ProviderError::Auth(reason),
            other => ProviderError::Protocol(other.to_string()),
        }
    }
}

impl From<native_tls::Error> for ProviderError {
    fn from(err: native_tls::Error) -> Self {
        ProviderError::Protocol(format!("tls: {err}"))
    }
}

/// Connection parameters for one IMAP account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapEndpoint {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub email: String,
    pub username: String,
    pub password: String,
}

fn port_or(value: Option<i64>, default: u16) -> u16 {
    value
        .and_then(|port| u16::try_from(port).ok())
        .filter(|port| *port != 0)
        .unwrap_or(default)
}

impl ImapEndpoint {
    pub fn for_account(account: &Account) -> ProviderResult<Self> {
        let (imap_default, smtp_default) = match account.provider {
            ProviderKind::Yahoo => (Some(YAHOO_IMAP_HOST), Some(YAHOO_SMTP_HOST)),
            _ => (None, None),
        };

        let imap_host = account
            .imap_host
            .clone()
            .filter(|h| !h.is_empty())
            .or_else(|| imap_default.map(str::to_string))
            .ok_or_else(|| ProviderError::Protocol(format!("account {} has no IMAP host", account.email)))?;
        let smtp_host = account
            .smtp_host
            .clone()
            .filter(|h| !h.is_empty())
            .or_else(|| smtp_default.map(str::to_string))
            .ok_or_else(|| ProviderError::Protocol(format!("account {} has no SMTP host", account.email)))?;
        let password = account
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProviderError::Auth(format!("account {} has no password", account.email)))?;

        Ok(Self {
            imap_host,
            imap_port: port_or(account.imap_port, DEFAULT_IMAP_PORT),
            smtp_host,
            smtp_port: port_or(account.smtp_port, DEFAULT_SMTP_PORT),
            email: account.email.clone(),
            username: account
                .username
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| account.email.clone()),
            password,
        })
    }

    /// Open a TLS session and log in. Blocking.
    pub fn connect(&self) -> ProviderResult<ImapSession> {
        let tls = native_tls::TlsConnector::builder().build()?;
        let client = ::imap::connect(
            (self.imap_host.as_str(), self.imap_port),
            &self.imap_host,
            &tls,
        )?;
        client
            .login(&self.username, &self.password)
            .map_err(|(err, _client)| ProviderError::from(err))
    }

    fn smtp_transport(&self) -> ProviderResult<SmtpTransport> {
        let credentials = Credentials::new(self.username.clone(), self.password.clone());
        let builder = if self.smtp_port == DEFAULT_SMTP_PORT {
            SmtpTransport::relay(&self.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&self.smtp_host)
        }
        .map_err(|e| ProviderError::Smtp(e.to_string()))?;
        Ok(builder.port(self.smtp_port).credentials(credentials).build())
    }
}

/// IMAP `SINCE` takes a date, so the window is widened to the whole day.
fn since_criterion(since: Option<i64>) -> String {
    since
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| format!("SINCE {}", dt.format("%d-%b-%Y")))
        .unwrap_or_else(|| "ALL".to_string())
}

fn join_uids(uids: &[u32]) -> String {
    uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

fn parse_fetch(fetch: &::imap::types::Fetch) -> Option<RemoteMessage> {
    let uid = fetch.uid?;
    let raw = fetch.body()?;
    let mail = match mailparse::parse_mail(raw) {
        Ok(mail) => mail,
        Err(e) => {
            log::warn!("imap: unparseable message uid {}: {}", uid, e);
            return None;
        }
    };

    let fields = header_fields(&mail);
    let body = extract_body(&mail);
    let flags = fetch.flags();
    let received_at = fetch
        .internal_date()
        .map(|dt| dt.timestamp_millis())
        .or(fields.date_millis)
        .unwrap_or_else(crate::models::now_millis);

    Some(RemoteMessage {
        provider_id: uid.to_string(),
        thread_id: fields.in_reply_to.clone().or_else(|| fields.message_id.clone()),
        message_id: fields.message_id,
        in_reply_to: fields.in_reply_to,
        from_name: fields.from_name,
        from_email: fields.from_email,
        to: fields.to,
        cc: fields.cc,
        subject: fields.subject,
        snippet: body.text.as_deref().map(make_snippet).unwrap_or_default(),
        body_text: body.text,
        body_html: body.html,
        received_at,
        is_read: flags.contains(&::imap::types::Flag::Seen),
        is_starred: flags.contains(&::imap::types::Flag::Flagged),
        folder: Folder::Inbox,
        category: None,
        has_list_unsubscribe: fields.has_list_unsubscribe,
        attachments: body.attachments,
    })
}

fn fetch_blocking(endpoint: &ImapEndpoint, request: FetchRequest) -> ProviderResult<Vec<RemoteMessage>> {
    let mut session = endpoint.connect()?;
    session.select(INBOX)?;

    let mut uids: Vec<u32> = session.uid_search(since_criterion(request.since))?.into_iter().collect();
    uids.sort_unstable();
    let limit = request.limit.max(1);

    let page: Vec<u32> = match request.since {
        None => {
            let mut newest: Vec<u32> = uids.iter().rev().take(limit).copied().collect();
            newest.reverse();
            newest
        }
        // SINCE matches whole days, so dates are checked before picking the
        // oldest page at or after the checkpoint.
        Some(since) if !uids.is_empty() => {
            let dates = session.uid_fetch(join_uids(&uids), "(UID INTERNALDATE)")?;
            let mut dated: Vec<(i64, u32)> = dates
                .iter()
                .filter_map(|fetch| Some((fetch.internal_date()?.timestamp_millis(), fetch.uid?)))
                .filter(|(received_at, _)| *received_at >= since)
                .collect();
            dated.sort_unstable();
            dated.into_iter().take(limit).map(|(_, uid)| uid).collect()
        }
        Some(_) => Vec::new(),
    };

    let mut messages = Vec::with_capacity(page.len());
    if !page.is_empty() {
        let fetches = session.uid_fetch(join_uids(&page), "(UID FLAGS INTERNALDATE BODY.PEEK[])")?;
        messages.extend(fetches.iter().filter_map(parse_fetch));
    }

    if let Err(e) = session.logout() {
        log::debug!("imap: logout from {} failed: {}", endpoint.imap_host, e);
    }
    Ok(messages)
}

fn move_blocking(endpoint: &ImapEndpoint, uid: &str, destination: &str) -> ProviderResult<()> {
    let mut session = endpoint.connect()?;
    session.select(INBOX)?;
    if session.uid_mv(uid, destination).is_err() {
        // Servers without MOVE get copy + delete + expunge.
        session.uid_copy(uid, destination)?;
        session.uid_store(uid, "+FLAGS (\\Deleted)")?;
        session.expunge()?;
    }
    let _ = session.logout();
    Ok(())
}

fn store_blocking(endpoint: &ImapEndpoint, uid: &str, query: &str) -> ProviderResult<()> {
    let mut session = endpoint.connect()?;
    session.select(INBOX)?;
    session.uid_store(uid, query)?;
    let _ = session.logout();
    Ok(())
}

/// IMAP mailbox access with SMTP delivery.
pub struct ImapProvider {
    endpoint: ImapEndpoint,
}

impl ImapProvider {
    pub fn new(endpoint: ImapEndpoint) -> Self {
        Self { endpoint }
    }

    async fn store(&self, uid: &str, query: String) -> ProviderResult<()> {
        let endpoint = self.endpoint.clone();
        let uid = uid.to_string();
        tokio::task::spawn_blocking(move || store_blocking(&endpoint, &uid, &query)).await?
    }

    async fn move_to(&self, uid: &str, destination: &'static str) -> ProviderResult<()> {
        let endpoint = self.endpoint.clone();
        let uid = uid.to_string();
        tokio::task::spawn_blocking(move || move_blocking(&endpoint, &uid, destination)).await?
    }
}

fn flag_query(flag: &str, set: bool) -> String {
    format!("{}FLAGS ({flag})", if set { '+' } else { '-' })
}

#[rocket::async_trait]
impl MailProvider for ImapProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Imap
    }

    async fn send(&self, message: &OutgoingMessage) -> ProviderResult<SentReceipt> {
        let built = build_rfc822(message)?;
        let message_id = built
            .headers()
            .get_raw("Message-ID")
            .map(|id| id.trim_matches(['<', '>', ' ']).to_string());
        let transport = self.endpoint.smtp_transport()?;

        tokio::task::spawn_blocking(move || transport.send(&built))
            .await?
            .map_err(|e| ProviderError::Smtp(e.to_string()))?;

        Ok(SentReceipt {
            provider_id: None,
            thread_id: message.thread_id.clone(),
            message_id,
        })
    }

    async fn fetch_messages(&self, request: FetchRequest) -> ProviderResult<Vec<RemoteMessage>> {
        let endpoint = self.endpoint.clone();
        tokio::task::spawn_blocking(move || fetch_blocking(&endpoint, request)).await?
    }

    async fn set_read(&self, remote_id: &str, read: bool) -> ProviderResult<()> {
        self.store(remote_id, flag_query("\\Seen", read)).await
    }

    async fn set_starred(&self, remote_id: &str, starred: bool) -> ProviderResult<()> {
        self.store(remote_id, flag_query("\\Flagged", starred)).await
    }

    async fn archive(&self, remote_id: &str) -> ProviderResult<()> {
        self.move_to(remote_id, ARCHIVE_MAILBOX).await
    }

    async fn trash(&self, remote_id: &str) -> ProviderResult<()> {
        self.move_to(remote_id, TRASH_MAILBOX).await
    }
}
