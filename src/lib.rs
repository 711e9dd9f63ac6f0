#[macro_use]
extern crate rocket;

pub mod config;
pub mod database;
pub mod db;
pub mod error;
pub mod idle;
pub mod importance;
pub mod jobs;
pub mod models;
pub mod providers;
pub mod realtime;
pub mod request_logger;
pub mod routes;
pub mod sync;

use crate::config::HambaConfig;
use crate::db::HambaDb;
use crate::idle::{IdleManager, ImapWatcher};
use crate::jobs::JobContext;
use crate::providers::{DefaultProviderFactory, ProviderFactory};
use crate::realtime::RealtimeHub;
use crate::request_logger::RequestLogger;
use crate::sync::SyncService;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use sqlx::SqlitePool;
use std::sync::{Arc, Once};
use tokio_util::sync::CancellationToken;

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(HambaDb::init())
        .attach(cors)
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match HambaDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    match database::run_migrations(&pool).await {
                        Ok(()) => Ok(rocket),
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::try_on_ignite("Manage Services", |rocket| async move {
            let pool = match HambaDb::fetch(&rocket) {
                Some(db) => (**db).clone(),
                None => return Err(rocket),
            };

            let config = HambaConfig::from_env();
            let providers: Arc<dyn ProviderFactory> = match DefaultProviderFactory::new(&config) {
                Ok(factory) => Arc::new(factory),
                Err(e) => {
                    log::error!("failed to build provider HTTP client: {}", e);
                    return Err(rocket);
                }
            };
            let hub = Arc::new(RealtimeHub::new());
            let sync = Arc::new(SyncService::new(
                pool.clone(),
                Arc::clone(&providers),
                Arc::clone(&hub),
                config.sync_batch_size,
            ));
            let idle = Arc::new(IdleManager::new(
                Arc::clone(&sync),
                Arc::new(ImapWatcher),
                config.idle_reconnect_delay,
                config.idle_timeout,
            ));

            Ok(rocket
                .manage(pool)
                .manage(config)
                .manage(providers)
                .manage(hub)
                .manage(sync)
                .manage(idle)
                .manage(CancellationToken::new()))
        }))
        .attach(AdHoc::on_liftoff("Spawn Background Jobs", |rocket| {
            Box::pin(async move {
                let (Some(pool), Some(config), Some(providers), Some(sync), Some(idle), Some(shutdown)) = (
                    rocket.state::<SqlitePool>(),
                    rocket.state::<HambaConfig>(),
                    rocket.state::<Arc<dyn ProviderFactory>>(),
                    rocket.state::<Arc<SyncService>>(),
                    rocket.state::<Arc<IdleManager>>(),
                    rocket.state::<CancellationToken>(),
                ) else {
                    log::error!("failed to spawn background jobs: managed state missing");
                    return;
                };

                if !config.background_jobs {
                    log::info!("background jobs disabled");
                    return;
                }

                log::info!("starting background jobs");
                let ctx = JobContext {
                    pool: pool.clone(),
                    config: config.clone(),
                    providers: Arc::clone(providers),
                    sync: Arc::clone(sync),
                    idle: Arc::clone(idle),
                };
                jobs::spawn_all(ctx, shutdown.clone()).await;
            })
        }))
        .attach(AdHoc::on_shutdown("Stop Background Jobs", |rocket| {
            Box::pin(async move {
                if let Some(shutdown) = rocket.state::<CancellationToken>() {
                    shutdown.cancel();
                }
                if let Some(idle) = rocket.state::<Arc<IdleManager>>() {
                    idle.shutdown();
                }
            })
        }))
        .mount(
            "/api",
            openapi_get_routes![
                routes::health::health_check,
                // Accounts
                routes::accounts::list_accounts,
                routes::accounts::create_account,
                routes::accounts::get_account,
                routes::accounts::delete_account,
                routes::accounts::sync_account,
                routes::accounts::reclassify_account,
                // Emails
                routes::emails::list_emails,
                routes::emails::search_emails,
                routes::emails::get_email,
                routes::emails::update_email,
                routes::emails::archive_email,
                routes::emails::trash_email,
                routes::emails::restore_email,
                routes::emails::delete_email,
                routes::emails::list_attachments,
                routes::emails::get_thread,
                // Labels
                routes::labels::list_labels,
                routes::labels::create_label,
                routes::labels::delete_label,
                routes::labels::email_labels,
                routes::labels::add_email_label,
                routes::labels::remove_email_label,
                // Drafts
                routes::drafts::list_drafts,
                routes::drafts::create_draft,
                routes::drafts::get_draft,
                routes::drafts::update_draft,
                routes::drafts::delete_draft,
                // Snippets
                routes::snippets::list_snippets,
                routes::snippets::create_snippet,
                routes::snippets::update_snippet,
                routes::snippets::delete_snippet,
                // Contacts
                routes::contacts::search_contacts,
                // Signatures
                routes::signatures::list_signatures,
                routes::signatures::create_signature,
                routes::signatures::update_signature,
                routes::signatures::delete_signature,
                // Outbox
                routes::outbox::list_scheduled,
                routes::outbox::schedule_send,
                routes::outbox::cancel_scheduled,
                routes::outbox::send,
                routes::outbox::undo_send,
            ],
        )
        .mount("/api", routes![realtime::websocket])
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Hamba API", "../../openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::config::HambaConfig;
    use crate::database::accounts;
    use crate::idle::{IdleConnection, IdleManager, MailboxWatcher};
    use crate::models::{Account, Folder, NewAccount, ProviderKind, now_millis};
    use crate::providers::{
        FetchRequest, MailProvider, OutgoingMessage, ProviderError, ProviderFactory, ProviderResult,
        RemoteMessage, SentReceipt,
    };
    use crate::realtime::RealtimeHub;
    use crate::sync::SyncService;
    use parking_lot::Mutex;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use sqlx::SqlitePool;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    pub use database::{TestDatabase, TestDatabaseError};

    pub mod database {
        use crate::database::run_migrations;
        use log::LevelFilter;
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use sqlx::{ConnectOptions, SqlitePool};
        use std::str::FromStr;
        use thiserror::Error;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
        }

        /// Private in-memory SQLite database with the schema applied.
        ///
        /// The pool holds exactly one connection that never expires: every
        /// connection to `sqlite::memory:` is its own database.
        pub struct TestDatabase {
            pool: SqlitePool,
        }

        impl TestDatabase {
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let options = SqliteConnectOptions::from_str("sqlite::memory:")?
                    .foreign_keys(true)
                    .log_statements(LevelFilter::Off);

                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?;

                run_migrations(&pool).await?;
                Ok(Self { pool })
            }

            pub fn pool(&self) -> &SqlitePool {
                &self.pool
            }

            pub fn pool_clone(&self) -> SqlitePool {
                self.pool.clone()
            }

            /// Re-run migrations (idempotent).
            pub async fn reset(&self) -> Result<(), TestDatabaseError> {
                run_migrations(&self.pool).await?;
                Ok(())
            }

            pub async fn close(self) {
                self.pool.close().await;
            }
        }
    }

    /// A provider call recorded by [`FakeProvider`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ProviderCall {
        Send { to: Vec<String>, subject: String },
        Fetch { since: Option<i64>, limit: usize },
        SetRead { remote_id: String, read: bool },
        SetStarred { remote_id: String, starred: bool },
        Archive(String),
        Trash(String),
    }

    /// In-memory provider that records every call.
    ///
    /// `fetch_messages` pages the mailbox like the real providers: the newest
    /// `limit` messages without a checkpoint, otherwise the oldest `limit`
    /// received at or after it.
    #[derive(Default)]
    pub struct FakeProvider {
        calls: Mutex<Vec<ProviderCall>>,
        mailbox: Mutex<Vec<RemoteMessage>>,
        failing: AtomicBool,
        sent_seq: AtomicU64,
    }

    impl FakeProvider {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn set_mailbox(&self, messages: Vec<RemoteMessage>) {
            *self.mailbox.lock() = messages;
        }

        /// Make every subsequent call fail with a provider error.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn calls(&self) -> Vec<ProviderCall> {
            self.calls.lock().clone()
        }

        pub fn sent(&self) -> Vec<ProviderCall> {
            self.calls()
                .into_iter()
                .filter(|call| matches!(call, ProviderCall::Send { .. }))
                .collect()
        }

        fn record(&self, call: ProviderCall) -> ProviderResult<()> {
            self.calls.lock().push(call);
            if self.failing.load(Ordering::SeqCst) {
                Err(ProviderError::Protocol("fake provider failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[rocket::async_trait]
    impl MailProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Gmail
        }

        async fn send(&self, message: &OutgoingMessage) -> ProviderResult<SentReceipt> {
            self.record(ProviderCall::Send {
                to: message.to.clone(),
                subject: message.subject.clone(),
            })?;
            let seq = self.sent_seq.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SentReceipt {
                provider_id: Some(format!("fake-sent-{seq}")),
                thread_id: message.thread_id.clone(),
                message_id: Some(format!("<fake-{seq}@hamba.test>")),
            })
        }

        async fn fetch_messages(&self, request: FetchRequest) -> ProviderResult<Vec<RemoteMessage>> {
            self.record(ProviderCall::Fetch {
                since: request.since,
                limit: request.limit,
            })?;
            let mut messages = self.mailbox.lock().clone();
            match request.since {
                Some(since) => {
                    messages.retain(|m| m.received_at >= since);
                    messages.sort_by_key(|m| m.received_at);
                }
                None => messages.sort_by_key(|m| std::cmp::Reverse(m.received_at)),
            }
            messages.truncate(request.limit);
            Ok(messages)
        }

        async fn set_read(&self, remote_id: &str, read: bool) -> ProviderResult<()> {
            self.record(ProviderCall::SetRead {
                remote_id: remote_id.to_string(),
                read,
            })
        }

        async fn set_starred(&self, remote_id: &str, starred: bool) -> ProviderResult<()> {
            self.record(ProviderCall::SetStarred {
                remote_id: remote_id.to_string(),
                starred,
            })
        }

        async fn archive(&self, remote_id: &str) -> ProviderResult<()> {
            self.record(ProviderCall::Archive(remote_id.to_string()))
        }

        async fn trash(&self, remote_id: &str) -> ProviderResult<()> {
            self.record(ProviderCall::Trash(remote_id.to_string()))
        }
    }

    /// Hands the same [`FakeProvider`] to every account.
    pub struct FakeProviderFactory {
        provider: Arc<FakeProvider>,
    }

    impl FakeProviderFactory {
        pub fn new(provider: Arc<FakeProvider>) -> Self {
            Self { provider }
        }
    }

    impl ProviderFactory for FakeProviderFactory {
        fn for_account(&self, _account: &Account) -> ProviderResult<Arc<dyn MailProvider>> {
            Ok(self.provider.clone())
        }
    }

    /// Watcher that never connects; IDLE loops just retry until unwatched.
    pub struct OfflineWatcher;

    impl MailboxWatcher for OfflineWatcher {
        fn open(&self, account: &Account) -> ProviderResult<Box<dyn IdleConnection>> {
            Err(ProviderError::Unsupported(format!(
                "no IMAP server in tests for {}",
                account.email
            )))
        }
    }

    /// Inbox message as a provider would return it.
    pub fn remote_message(provider_id: &str, from_email: &str, subject: &str, received_at: i64) -> RemoteMessage {
        RemoteMessage {
            provider_id: provider_id.to_string(),
            thread_id: Some(format!("thread-{provider_id}")),
            message_id: Some(format!("<{provider_id}@example.com>")),
            in_reply_to: None,
            from_name: None,
            from_email: from_email.to_string(),
            to: vec!["me@example.com".to_string()],
            cc: Vec::new(),
            subject: subject.to_string(),
            snippet: format!("{subject} snippet"),
            body_text: Some(format!("{subject} body")),
            body_html: None,
            received_at,
            is_read: false,
            is_starred: false,
            folder: Folder::Inbox,
            category: None,
            has_list_unsubscribe: false,
            attachments: Vec::new(),
        }
    }

    /// Row values for [`TestFixtures::insert_email`].
    #[derive(Debug, Clone)]
    pub struct EmailSeed {
        pub account_id: i64,
        pub provider_id: String,
        pub thread_id: Option<String>,
        pub from_email: String,
        pub to_addresses: String,
        pub subject: String,
        pub received_at: i64,
        pub folder: Folder,
        pub is_read: bool,
        pub is_important: bool,
        pub is_sent: bool,
        pub trashed_at: Option<i64>,
    }

    impl EmailSeed {
        pub fn new(account_id: i64, provider_id: &str) -> Self {
            Self {
                account_id,
                provider_id: provider_id.to_string(),
                thread_id: None,
                from_email: "sender@example.com".to_string(),
                to_addresses: "me@example.com".to_string(),
                subject: format!("Subject {provider_id}"),
                received_at: now_millis(),
                folder: Folder::Inbox,
                is_read: false,
                is_important: false,
                is_sent: false,
                trashed_at: None,
            }
        }
    }

    /// Insert helpers for seeding tables in tests.
    pub struct TestFixtures<'a> {
        pool: &'a SqlitePool,
    }

    impl<'a> TestFixtures<'a> {
        pub fn new(pool: &'a SqlitePool) -> Self {
            Self { pool }
        }

        pub async fn insert_account(&self, provider: ProviderKind, email: &str) -> Result<Account, sqlx::Error> {
            let request = NewAccount {
                provider: provider.to_string(),
                email: email.to_string(),
                display_name: Some("Test User".to_string()),
                access_token: Some("test-token".to_string()),
                refresh_token: None,
                token_expires_at: None,
                imap_host: None,
                imap_port: None,
                smtp_host: None,
                smtp_port: None,
                username: None,
                password: Some("test-password".to_string()),
            };
            accounts::insert_account(self.pool, provider, &request).await
        }

        pub async fn insert_email(&self, seed: &EmailSeed) -> Result<i64, sqlx::Error> {
            let id = sqlx::query(
                r#"INSERT INTO emails (account_id, provider_id, thread_id, from_email, to_addresses,
                                       subject, snippet, received_at, is_read, is_important, is_sent,
                                       folder, trashed_at, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(seed.account_id)
            .bind(&seed.provider_id)
            .bind(&seed.thread_id)
            .bind(&seed.from_email)
            .bind(&seed.to_addresses)
            .bind(&seed.subject)
            .bind(&seed.subject)
            .bind(seed.received_at)
            .bind(seed.is_read)
            .bind(seed.is_important)
            .bind(seed.is_sent)
            .bind(seed.folder)
            .bind(seed.trashed_at)
            .bind(now_millis())
            .execute(self.pool)
            .await?
            .last_insert_rowid();
            Ok(id)
        }

        pub async fn count(&self, table: &str, account_id: i64) -> Result<i64, sqlx::Error> {
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE account_id = ?"))
                .bind(account_id)
                .fetch_one(self.pool)
                .await
        }
    }

    /// Builder for Rocket instances used by the route tests.
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pool: Option<SqlitePool>,
        providers: Option<Arc<dyn ProviderFactory>>,
        hub: Option<Arc<RealtimeHub>>,
        config: HambaConfig,
    }

    impl Default for TestRocketBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestRocketBuilder {
        /// Random port, logging disabled, background jobs off.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                pool: None,
                providers: None,
                hub: None,
                config: HambaConfig {
                    background_jobs: false,
                    ..HambaConfig::from_env()
                },
            }
        }

        /// Mount routes under `/api`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api".to_string(), routes));
            self
        }

        pub fn manage_pool(mut self, pool: SqlitePool) -> Self {
            self.pool = Some(pool);
            self
        }

        pub fn with_providers(mut self, providers: Arc<dyn ProviderFactory>) -> Self {
            self.providers = Some(providers);
            self
        }

        pub fn with_hub(mut self, hub: Arc<RealtimeHub>) -> Self {
            self.hub = Some(hub);
            self
        }

        pub fn with_config(mut self, config: HambaConfig) -> Self {
            self.config = config;
            self
        }

        /// Listen on a fixed port when the instance is launched for real.
        pub fn with_port(mut self, port: u16) -> Self {
            self.figment = self.figment.merge(("port", port));
            self
        }

        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            let providers = self
                .providers
                .unwrap_or_else(|| Arc::new(FakeProviderFactory::new(FakeProvider::new())));
            let hub = self.hub.unwrap_or_else(|| Arc::new(RealtimeHub::new()));

            if let Some(pool) = self.pool {
                let sync = Arc::new(SyncService::new(
                    pool.clone(),
                    Arc::clone(&providers),
                    Arc::clone(&hub),
                    self.config.sync_batch_size,
                ));
                let idle = Arc::new(IdleManager::new(
                    Arc::clone(&sync),
                    Arc::new(OfflineWatcher),
                    self.config.idle_reconnect_delay,
                    self.config.idle_timeout,
                ));
                rocket = rocket.manage(pool).manage(sync).manage(idle);
            }

            rocket.manage(self.config).manage(providers).manage(hub)
        }

        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
