//! Queries shared by the routes, the sync service and the background jobs.
//!
//! Route-only CRUD (labels, snippets, signatures, drafts) stays inline in the
//! handlers; anything a background job also touches lives here.

pub mod accounts;
pub mod contacts;
pub mod emails;
pub mod migration;
pub mod outbox;

pub use migration::run_migrations;
