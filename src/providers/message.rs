//! RFC 822 building and parsing shared by the providers.

use super::{OutgoingMessage, ProviderError, ProviderResult, RemoteAttachment};
use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use mailparse::{MailHeaderMap, ParsedMail, addrparse, dateparse};

const SNIPPET_MAX_CHARS: usize = 200;

fn mailbox(address: &str, name: Option<&str>) -> ProviderResult<Mailbox> {
    let parsed: Mailbox = address
        .trim()
        .parse()
        .map_err(|e| ProviderError::Message(format!("invalid address '{address}': {e}")))?;
    match name.filter(|n| !n.trim().is_empty()) {
        Some(name) => Ok(Mailbox::new(Some(name.to_string()), parsed.email)),
        None => Ok(parsed),
    }
}

/// Build a plain-text RFC 822 message for SMTP and Gmail raw sends.
pub fn build_rfc822(message: &OutgoingMessage) -> ProviderResult<Message> {
    let mut builder = Message::builder()
        .from(mailbox(&message.from, message.from_name.as_deref())?)
        .subject(message.subject.clone());

    for to in &message.to {
        builder = builder.to(mailbox(to, None)?);
    }
    for cc in &message.cc {
        builder = builder.cc(mailbox(cc, None)?);
    }
    for bcc in &message.bcc {
        builder = builder.bcc(mailbox(bcc, None)?);
    }
    if let Some(parent) = message.in_reply_to.as_deref().and_then(angle_message_id) {
        builder = builder
            .in_reply_to(parent.clone())
            .references(parent);
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(message.body.clone())
        .map_err(|e| ProviderError::Message(e.to_string()))
}

/// Collapse whitespace and cut a body down to a list preview.
pub fn make_snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_MAX_CHARS {
        collapsed
    } else {
        let mut cut: String = collapsed.chars().take(SNIPPET_MAX_CHARS).collect();
        cut.push('…');
        cut
    }
}

/// Split a header like `"Ann" <ann@x.com>, bob@y.com` into bare addresses.
pub fn parse_address_list(value: &str) -> Vec<String> {
    match addrparse(value) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                mailparse::MailAddr::Single(info) => vec![info.addr.clone()],
                mailparse::MailAddr::Group(group) => {
                    group.addrs.iter().map(|info| info.addr.clone()).collect()
                }
            })
            .collect(),
        Err(_) => value
            .split(',')
            .map(|part| part.trim().trim_matches(['<', '>']).to_string())
            .filter(|part| part.contains('@'))
            .collect(),
    }
}

/// Parse a single `From` header into `(display name, address)`.
pub fn parse_sender(value: &str) -> (Option<String>, String) {
    if let Ok(list) = addrparse(value)
        && let Some(mailparse::MailAddr::Single(info)) = list.iter().next()
    {
        return (info.display_name.clone(), info.addr.clone());
    }
    (None, value.trim().trim_matches(['<', '>']).to_string())
}

/// Message-ID in header form; stored ids have their brackets stripped.
fn angle_message_id(value: &str) -> Option<String> {
    clean_message_id(value).map(|id| format!("<{id}>"))
}

/// Strip the angle brackets around a Message-ID.
pub fn clean_message_id(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_matches(['<', '>']).trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Body, snippet and attachment metadata extracted from a MIME tree.
#[derive(Debug, Default)]
pub struct ParsedBody {
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<RemoteAttachment>,
}

fn walk_parts(part: &ParsedMail<'_>, out: &mut ParsedBody) {
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();

    if let Some(filename) = filename {
        let size = part.get_body_raw().map(|raw| raw.len() as i64).unwrap_or(0);
        out.attachments.push(RemoteAttachment {
            filename,
            mime_type: part.ctype.mimetype.clone(),
            size,
            provider_attachment_id: part.headers.get_first_value("Content-ID"),
        });
        return;
    }

    if part.subparts.is_empty() {
        let mimetype = part.ctype.mimetype.to_ascii_lowercase();
        if mimetype == "text/plain" && out.text.is_none() {
            out.text = part.get_body().ok();
        } else if mimetype == "text/html" && out.html.is_none() {
            out.html = part.get_body().ok();
        }
        return;
    }

    for sub in &part.subparts {
        walk_parts(sub, out);
    }
}

/// Walk a parsed message collecting the first text and html parts.
pub fn extract_body(mail: &ParsedMail<'_>) -> ParsedBody {
    let mut out = ParsedBody::default();
    walk_parts(mail, &mut out);
    out
}

/// Headers of a raw message the importance rules and threading care about.
#[derive(Debug, Default)]
pub struct HeaderFields {
    pub from_name: Option<String>,
    pub from_email: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub date_millis: Option<i64>,
    pub has_list_unsubscribe: bool,
}

pub fn header_fields(mail: &ParsedMail<'_>) -> HeaderFields {
    let headers = &mail.headers;
    let (from_name, from_email) = headers
        .get_first_value("From")
        .map(|from| parse_sender(&from))
        .unwrap_or((None, String::new()));

    HeaderFields {
        from_name,
        from_email,
        to: headers
            .get_first_value("To")
            .map(|v| parse_address_list(&v))
            .unwrap_or_default(),
        cc: headers
            .get_first_value("Cc")
            .map(|v| parse_address_list(&v))
            .unwrap_or_default(),
        subject: headers.get_first_value("Subject").unwrap_or_default(),
        message_id: headers
            .get_first_value("Message-ID")
            .and_then(|v| clean_message_id(&v)),
        in_reply_to: headers
            .get_first_value("In-Reply-To")
            .and_then(|v| clean_message_id(&v)),
        date_millis: headers
            .get_first_value("Date")
            .and_then(|v| dateparse(&v).ok())
            .map(|secs| secs * 1000),
        has_list_unsubscribe: headers.get_first_value("List-Unsubscribe").is_some(),
    }
}
