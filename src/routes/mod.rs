//! HTTP route handlers grouped by resource.
//!
//! Every handler is annotated with `#[openapi]` so `rocket_okapi` derives the
//! OpenAPI document; the WebSocket upgrade in [`crate::realtime`] is the one
//! route mounted outside of it.

pub mod accounts;
pub mod contacts;
pub mod drafts;
pub mod emails;
pub mod health;
pub(crate) mod helpers;
pub mod labels;
pub mod outbox;
pub mod params;
pub mod signatures;
pub mod snippets;
