//! Split Inbox importance heuristic.
//!
//! An email is "important" when a fixed-weight sum of rule hits is above
//! zero. The rules look at the sender address, subject, snippet, provider
//! category and two sender statistics pulled from the local mailbox:
//!
//! - how many times the sender has written to this account, and
//! - how many times this account has written to the sender.
//!
//! There is no learning and no feedback loop; rerunning the scorer on the
//! same inputs always gives the same answer.

use regex::Regex;
use sqlx::SqlitePool;
use std::sync::LazyLock;

const WEIGHT_SENT_TO_SENDER: i32 = 3;
const WEIGHT_CONVERSATION: i32 = 1;
const WEIGHT_PERSONAL_DOMAIN: i32 = 2;
const WEIGHT_DIRECT_RECIPIENT: i32 = 1;
const WEIGHT_REPLY_SUBJECT: i32 = 1;
const WEIGHT_STARRED: i32 = 5;
const WEIGHT_AUTOMATED_SENDER: i32 = -4;
const WEIGHT_PROMOTIONAL_TEXT: i32 = -2;
const WEIGHT_LIST_UNSUBSCRIBE: i32 = -2;
const WEIGHT_BULK_CATEGORY: i32 = -3;

/// Minimum received count before a two-way conversation earns a bonus.
const CONVERSATION_MIN_RECEIVED: i64 = 3;

const PERSONAL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "yahoo.com",
    "icloud.com",
    "me.com",
    "proton.me",
    "protonmail.com",
    "fastmail.com",
    "hey.com",
];

const AUTOMATED_SENDER_PATTERNS: &[&str] = &[
    "noreply",
    "no-reply",
    "no_reply",
    "donotreply",
    "do-not-reply",
    "notifications",
    "notification",
    "mailer-daemon",
    "postmaster",
    "newsletter",
    "marketing",
    "bounce",
    "alerts",
    "digest",
    "updates@",
    "info@",
    "news@",
    "support@",
    "billing@",
    "automated",
];

const PROMOTIONAL_PHRASES: &[&str] = &[
    "unsubscribe",
    "limited time",
    "sale",
    "deal",
    "discount",
    "offer",
    "promo",
    "free shipping",
    "newsletter",
    "view in browser",
    "webinar",
    "act now",
];

const BULK_CATEGORIES: &[&str] = &[
    "promotions",
    "category_promotions",
    "social",
    "category_social",
    "updates",
    "category_updates",
    "forums",
    "category_forums",
];

static PERCENT_OFF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d{1,3}\s?%\s?off\b").expect("valid percent-off regex"));

static REPLY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(re|aw|sv)\s*(\[\d+\])?\s*:").expect("valid reply regex"));

/// Everything the scorer reads from a single message.
#[derive(Debug, Clone, Default)]
pub struct ImportanceSignals {
    pub from_email: String,
    pub subject: String,
    pub snippet: String,
    pub to_addresses: Vec<String>,
    pub account_email: String,
    /// Provider category labels (Gmail `CATEGORY_*`, Outlook inference class).
    pub labels: Vec<String>,
    pub has_list_unsubscribe: bool,
    pub is_starred: bool,
}

/// Per-sender counts taken from the local mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub received_from: i64,
    pub sent_to: i64,
}

fn sender_domain(address: &str) -> Option<String> {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().trim_end_matches('>').to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
}

fn is_automated_sender(address: &str) -> bool {
    let lower = address.to_ascii_lowercase();
    AUTOMATED_SENDER_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

fn has_promotional_text(subject: &str, snippet: &str) -> bool {
    let haystack = format!("{} {}", subject, snippet).to_lowercase();
    PERCENT_OFF.is_match(&haystack)
        || PROMOTIONAL_PHRASES.iter().any(|phrase| {
            haystack
                .split(|c: char| !c.is_alphanumeric() && c != ' ')
                .any(|chunk| contains_phrase(chunk, phrase))
        })
}

/// Whole-word phrase match so "sale" does not hit "wholesaler".
fn contains_phrase(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn is_direct_recipient(to_addresses: &[String], account_email: &str) -> bool {
    if account_email.is_empty() {
        return false;
    }
    let account = account_email.trim();
    to_addresses
        .iter()
        .any(|addr| addr.trim().trim_matches(['<', '>']).eq_ignore_ascii_case(account))
}

fn in_bulk_category(labels: &[String]) -> bool {
    labels.iter().any(|label| {
        let lower = label.to_ascii_lowercase();
        BULK_CATEGORIES.contains(&lower.as_str())
    })
}

/// Sum of rule weights for a message.
pub fn score(signals: &ImportanceSignals, stats: &SenderStats) -> i32 {
    let mut total = 0;

    if stats.sent_to > 0 {
        total += WEIGHT_SENT_TO_SENDER;
        if stats.received_from >= CONVERSATION_MIN_RECEIVED {
            total += WEIGHT_CONVERSATION;
        }
    }

    if sender_domain(&signals.from_email)
        .is_some_and(|domain| PERSONAL_DOMAINS.contains(&domain.as_str()))
    {
        total += WEIGHT_PERSONAL_DOMAIN;
    }

    if is_direct_recipient(&signals.to_addresses, &signals.account_email) {
        total += WEIGHT_DIRECT_RECIPIENT;
    }

    if REPLY_PREFIX.is_match(&signals.subject) {
        total += WEIGHT_REPLY_SUBJECT;
    }

    if signals.is_starred {
        total += WEIGHT_STARRED;
    }

    if is_automated_sender(&signals.from_email) {
        total += WEIGHT_AUTOMATED_SENDER;
    }

    if has_promotional_text(&signals.subject, &signals.snippet) {
        total += WEIGHT_PROMOTIONAL_TEXT;
    }

    if signals.has_list_unsubscribe {
        total += WEIGHT_LIST_UNSUBSCRIBE;
    }

    if in_bulk_category(&signals.labels) {
        total += WEIGHT_BULK_CATEGORY;
    }

    total
}

/// Zero threshold: anything strictly positive lands in the Important tab.
pub fn is_important(signals: &ImportanceSignals, stats: &SenderStats) -> bool {
    score(signals, stats) > 0
}

/// Count mail received from and sent to `sender` within one account.
pub async fn lookup_sender_stats(
    pool: &SqlitePool,
    account_id: i64,
    sender: &str,
) -> Result<SenderStats, sqlx::Error> {
    let sender = sender.trim().to_lowercase();
    if sender.is_empty() {
        return Ok(SenderStats::default());
    }

    let received_from: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM emails WHERE account_id = ? AND is_sent = 0 AND lower(from_email) = ?",
    )
    .bind(account_id)
    .bind(&sender)
    .fetch_one(pool)
    .await?;

    let sent_to: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM emails
           WHERE account_id = ? AND is_sent = 1
             AND instr(',' || lower(replace(to_addresses || ',' || cc_addresses, ' ', '')) || ',',
                       ',' || ? || ',') > 0"#,
    )
    .bind(account_id)
    .bind(&sender)
    .fetch_one(pool)
    .await?;

    Ok(SenderStats {
        received_from,
        sent_to,
    })
}

/// Look up sender statistics and score the message in one step.
pub async fn classify(
    pool: &SqlitePool,
    account_id: i64,
    signals: &ImportanceSignals,
) -> Result<bool, sqlx::Error> {
    let stats = lookup_sender_stats(pool, account_id, &signals.from_email).await?;
    Ok(is_important(signals, &stats))
}

/// Recompute `is_important` for every inbox email of an account.
///
/// Returns the number of rows whose flag changed.
pub async fn reclassify_account(
    pool: &SqlitePool,
    account_id: i64,
    account_email: &str,
) -> Result<u64, sqlx::Error> {
    let rows: Vec<(i64, String, String, String, String, bool, bool, Option<String>, bool)> =
        sqlx::query_as(
            r#"SELECT id, from_email, subject, snippet, to_addresses, has_list_unsubscribe,
                      is_starred, category, is_important
               FROM emails
               WHERE account_id = ? AND folder = 'inbox'"#,
        )
        .bind(account_id)
        .fetch_all(pool)
        .await?;

    let mut changed = 0;
    for (id, from_email, subject, snippet, to_addresses, unsubscribe, starred, category, current) in
        rows
    {
        let signals = ImportanceSignals {
            from_email,
            subject,
            snippet,
            to_addresses: crate::models::split_addresses(&to_addresses),
            account_email: account_email.to_string(),
            labels: category.into_iter().collect(),
            has_list_unsubscribe: unsubscribe,
            is_starred: starred,
        };
        let important = classify(pool, account_id, &signals).await?;
        if important != current {
            sqlx::query("UPDATE emails SET is_important = ? WHERE id = ?")
                .bind(important)
                .bind(id)
                .execute(pool)
                .await?;
            changed += 1;
        }
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(from: &str, subject: &str) -> ImportanceSignals {
        ImportanceSignals {
            from_email: from.to_string(),
            subject: subject.to_string(),
            snippet: String::new(),
            to_addresses: vec!["me@hamba.dev".to_string()],
            account_email: "me@hamba.dev".to_string(),
            labels: Vec::new(),
            has_list_unsubscribe: false,
            is_starred: false,
        }
    }

    #[test]
    fn direct_mail_from_unknown_business_sender_is_important() {
        let s = signals("alice@acme.io", "Contract draft");
        assert_eq!(score(&s, &SenderStats::default()), 1);
        assert!(is_important(&s, &SenderStats::default()));
    }

    #[test]
    fn mail_not_addressed_to_account_sits_at_threshold() {
        let mut s = signals("alice@acme.io", "Contract draft");
        s.to_addresses = vec!["team@acme.io".to_string()];
        assert_eq!(score(&s, &SenderStats::default()), 0);
        assert!(!is_important(&s, &SenderStats::default()));
    }

    #[test]
    fn noreply_newsletter_is_other() {
        let mut s = signals("no-reply@shop.example", "Weekly newsletter: 20% off everything");
        s.has_list_unsubscribe = true;
        assert!(score(&s, &SenderStats::default()) < 0);
        assert!(!is_important(&s, &SenderStats::default()));
    }

    #[test]
    fn replying_to_sender_rescues_automated_looking_address() {
        let s = signals("support@vendor.example", "Re: ticket 4411");
        let stats = SenderStats {
            received_from: 4,
            sent_to: 2,
        };
        // +3 sent, +1 conversation, +1 direct, +1 reply, -4 automated
        assert_eq!(score(&s, &stats), 2);
    }

    #[test]
    fn personal_domain_adds_weight() {
        let mut s = signals("friend@gmail.com", "dinner?");
        s.to_addresses.clear();
        assert_eq!(score(&s, &SenderStats::default()), WEIGHT_PERSONAL_DOMAIN);
    }

    #[test]
    fn bulk_category_labels_count_against() {
        let mut s = signals("team@startup.example", "Product changelog");
        s.labels = vec!["CATEGORY_UPDATES".to_string()];
        assert_eq!(score(&s, &SenderStats::default()), 1 + WEIGHT_BULK_CATEGORY);
    }

    #[test]
    fn starred_outweighs_promotional_wording() {
        let mut s = signals("friend@gmail.com", "Garage sale this weekend");
        assert_eq!(score(&s, &SenderStats::default()), 2 + 1 - 2);
        s.is_starred = true;
        assert_eq!(score(&s, &SenderStats::default()), 6);
    }

    #[test]
    fn marketing_blast_scores_negative() {
        let mut s = signals("marketing@brand.example", "Limited time offer");
        s.has_list_unsubscribe = true;
        // +1 direct, -4 automated, -2 promotional, -2 list header
        assert_eq!(score(&s, &SenderStats::default()), -7);
    }

    #[test]
    fn promotional_phrases_match_whole_words() {
        assert!(has_promotional_text("Summer sale", ""));
        assert!(has_promotional_text("", "Click to unsubscribe."));
        assert!(has_promotional_text("Save 50 % off today", ""));
        assert!(!has_promotional_text("Wholesaler invoice", ""));
        assert!(!has_promotional_text("Meeting notes", "see attached"));
    }

    #[test]
    fn reply_prefix_variants() {
        assert!(REPLY_PREFIX.is_match("Re: lunch"));
        assert!(REPLY_PREFIX.is_match("RE[2]: lunch"));
        assert!(REPLY_PREFIX.is_match("AW: Termin"));
        assert!(!REPLY_PREFIX.is_match("Regarding lunch"));
    }

    #[test]
    fn direct_recipient_needs_the_whole_address() {
        let to = vec!["jime@hamba.dev".to_string(), "Ops@Hamba.dev".to_string()];
        assert!(!is_direct_recipient(&to, "me@hamba.dev"));
        assert!(is_direct_recipient(&to, "ops@hamba.dev"));
        assert!(is_direct_recipient(&["<me@hamba.dev>".to_string()], "me@hamba.dev"));
    }

    #[test]
    fn sender_domain_handles_angle_brackets() {
        assert_eq!(sender_domain("bob@Example.COM>").as_deref(), Some("example.com"));
        assert_eq!(sender_domain("nobody"), None);
    }
}
