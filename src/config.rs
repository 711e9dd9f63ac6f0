//! Application settings read from the environment.
//!
//! Rocket's own configuration (listen address, database URL) stays in
//! `Rocket.toml` / `ROCKET_*`; everything the background jobs and providers
//! need lives here.

use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(key, default_secs).max(1))
}

fn env_millis(key: &str, default_millis: u64) -> Duration {
    Duration::from_millis(env_u64(key, default_millis).max(1))
}

/// Runtime configuration for jobs, sync and provider clients.
#[derive(Debug, Clone)]
pub struct HambaConfig {
    pub scheduled_poll_interval: Duration,
    pub pending_poll_interval: Duration,
    pub undo_send_window: Duration,
    pub sync_interval: Duration,
    pub sync_batch_size: usize,
    pub trash_retention_days: i64,
    pub cleanup_interval: Duration,
    pub idle_reconnect_delay: Duration,
    pub idle_timeout: Duration,
    pub background_jobs: bool,
    pub http_timeout: Duration,
}

impl HambaConfig {
    pub fn from_env() -> Self {
        Self {
            scheduled_poll_interval: env_secs("HAMBA_SCHEDULED_POLL_SECS", 30),
            pending_poll_interval: env_secs("HAMBA_PENDING_POLL_SECS", 1),
            undo_send_window: Duration::from_secs(env_u64("HAMBA_UNDO_SEND_SECS", 10)),
            sync_interval: env_secs("HAMBA_SYNC_INTERVAL_SECS", 300),
            sync_batch_size: env_u64("HAMBA_SYNC_BATCH_SIZE", 50).clamp(1, 500) as usize,
            trash_retention_days: i64::try_from(env_u64("HAMBA_TRASH_RETENTION_DAYS", 30)).unwrap_or(i64::MAX),
            cleanup_interval: env_secs("HAMBA_CLEANUP_INTERVAL_SECS", 3600),
            idle_reconnect_delay: env_secs("HAMBA_IDLE_RECONNECT_SECS", 10),
            // Servers drop IDLE after 30 minutes of silence.
            idle_timeout: env_secs("HAMBA_IDLE_TIMEOUT_SECS", 25 * 60).min(Duration::from_secs(29 * 60)),
            background_jobs: env_bool("HAMBA_BACKGROUND_JOBS", true),
            http_timeout: env_millis("HAMBA_HTTP_TIMEOUT_MS", 30_000),
        }
    }

    /// Undo window in milliseconds, as stored alongside pending sends.
    pub fn undo_send_millis(&self) -> i64 {
        i64::try_from(self.undo_send_window.as_millis()).unwrap_or(i64::MAX)
    }

    /// Trash retention expressed in milliseconds, saturating on huge values.
    pub fn trash_retention_millis(&self) -> i64 {
        self.trash_retention_days.max(0).saturating_mul(24 * 60 * 60 * 1000)
    }
}

impl Default for HambaConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
