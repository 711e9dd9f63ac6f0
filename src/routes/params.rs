//! Query parameter helpers shared by multiple API route handlers.
//!
//! These structs follow Rocket's `FromForm` conventions and derive
//! `JsonSchema` so the generated OpenAPI document lists each parameter.

use crate::database::emails::InboxSplit;
use crate::models::Folder;
use rocket::form::{self, ValueField};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const fn default_page() -> i64 {
    1
}

const fn default_page_size() -> i64 {
    50
}

const fn default_contact_limit() -> i64 {
    10
}

const MAX_PAGE_SIZE: i64 = 100;
const MAX_CONTACT_LIMIT: i64 = 50;

impl<'r> form::FromFormField<'r> for Folder {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        field
            .value
            .parse::<Folder>()
            .map_err(|e| form::Error::validation(e).into())
    }
}

/// Split Inbox half selected with `?split=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SplitParam {
    /// Messages the importance rules scored above zero.
    Important,
    /// Everything else.
    Other,
}

impl From<SplitParam> for InboxSplit {
    fn from(value: SplitParam) -> Self {
        match value {
            SplitParam::Important => InboxSplit::Important,
            SplitParam::Other => InboxSplit::Other,
        }
    }
}

impl<'r> form::FromFormField<'r> for SplitParam {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        match field.value.trim().to_ascii_lowercase().as_str() {
            "important" => Ok(SplitParam::Important),
            "other" | "others" => Ok(SplitParam::Other),
            other => Err(form::Error::validation(format!(
                "invalid split '{other}'; expected 'important' or 'other'"
            ))
            .into()),
        }
    }
}

/// Common pagination parameters applied to list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, rocket::form::FromForm)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    /// One-based page index (defaults to the first page).
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    /// Number of items per page (clamped between 1 and 100, default 50).
    #[field(default = 50)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            size: default_page_size(),
        }
    }
}

impl PaginationParams {
    pub fn page(&self) -> i64 {
        self.page.max(1)
    }

    pub fn size(&self) -> i64 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// Filters for the mailbox listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, rocket::form::FromForm)]
#[serde(rename_all = "camelCase")]
pub struct EmailListParams {
    /// Folder to list; defaults to the inbox.
    pub folder: Option<Folder>,
    /// `important` or `other` for the Split Inbox. Only applies to the inbox.
    pub split: Option<SplitParam>,
    /// Only unread messages.
    #[field(default = false)]
    #[serde(default)]
    pub unread: bool,
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    #[field(default = 50)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl EmailListParams {
    pub fn folder(&self) -> Folder {
        self.folder.unwrap_or(Folder::Inbox)
    }

    /// The split is ignored outside the inbox.
    pub fn split(&self) -> Option<InboxSplit> {
        if self.folder() == Folder::Inbox {
            self.split.map(InboxSplit::from)
        } else {
            None
        }
    }

    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            size: self.size,
        }
    }
}

/// Free-text mailbox search.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, rocket::form::FromForm)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Text matched against sender, subject and body.
    pub q: Option<String>,
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    #[field(default = 50)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl SearchParams {
    /// Trimmed query, `None` when blank.
    pub fn query(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            size: self.size,
        }
    }
}

/// Contact autocomplete.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, rocket::form::FromForm)]
pub struct ContactQueryParams {
    /// Prefix or substring of the address or name.
    pub q: Option<String>,
    /// Maximum suggestions (1 to 50, default 10).
    #[field(default = 10)]
    #[serde(default = "default_contact_limit")]
    pub limit: i64,
}

impl ContactQueryParams {
    pub fn limit(&self) -> i64 {
        self.limit.clamp(1, MAX_CONTACT_LIMIT)
    }
}
