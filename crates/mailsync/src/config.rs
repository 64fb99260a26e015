//! Configuration loading for the sync engine
//!
//! Settings come from (later wins):
//! 1. Built-in defaults
//! 2. JSON file (`~/.config/mailsync/mailsync.json` or an explicit path)
//! 3. Environment variables (`MAILSYNC_DB_PATH`, `MAILSYNC_INTERVAL_SECS`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gmail::{StaticToken, StoredTokenFile, TokenProvider};
use crate::sync::{DEFAULT_CONCURRENCY, DEFAULT_PAGE_SIZE, RetryPolicy, SyncOptions};

/// Config filename in the mailsync config directory
pub const CONFIG_FILE: &str = "mailsync.json";

/// Database filename used when `db_path` is not set
const DEFAULT_DB_FILE: &str = "mailsync.db";

const ENV_DB_PATH: &str = "MAILSYNC_DB_PATH";
const ENV_INTERVAL_SECS: &str = "MAILSYNC_INTERVAL_SECS";
const ENV_ACCESS_TOKEN: &str = "MAILSYNC_ACCESS_TOKEN";

/// Sync daemon settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// SQLite database file; defaults to `mailsync.db` in the config directory
    pub db_path: Option<PathBuf>,
    /// Seconds between cycles of the periodic worker
    pub interval_secs: u64,
    pub page_size: usize,
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Take over a sync lock held longer than this
    pub stale_lock_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            interval_secs: 60,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: RetryPolicy::DEFAULT_MAX_RETRIES,
            backoff_base_ms: RetryPolicy::DEFAULT_BASE_DELAY.as_millis() as u64,
            stale_lock_secs: None,
        }
    }
}

impl SyncConfig {
    /// Load from the default config file (if present) and the environment
    pub fn load() -> Result<Self> {
        let config: Self = config::load_json_or_default(CONFIG_FILE)?;
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Load from a specific JSON file and the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse config JSON")
    }

    /// Apply environment-style overrides from `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.is_empty()) {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = lookup(ENV_INTERVAL_SECS) {
            self.interval_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds", ENV_INTERVAL_SECS))?;
        }
        Ok(self)
    }

    /// Database path, falling back to the config directory
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => {
                let dir = config::ensure_config_dir()?;
                Ok(dir.join(DEFAULT_DB_FILE))
            }
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn stale_lock_after(&self) -> Option<chrono::Duration> {
        self.stale_lock_secs
            .and_then(|secs| chrono::Duration::try_seconds(i64::try_from(secs).ok()?))
    }

    /// Engine options derived from these settings
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            page_size: self.page_size,
            concurrency: self.concurrency,
            stale_after: self.stale_lock_after(),
            retry: RetryPolicy::new(
                self.max_retries,
                Duration::from_millis(self.backoff_base_ms),
            ),
        }
    }
}

/// Access token source: `MAILSYNC_ACCESS_TOKEN`, else the stored token file
pub fn token_provider() -> Result<Box<dyn TokenProvider>> {
    if let Ok(token) = std::env::var(ENV_ACCESS_TOKEN)
        && !token.is_empty()
    {
        return Ok(Box::new(StaticToken::new(token)));
    }

    let file = StoredTokenFile::default_location()?;
    if !file.path().exists() {
        anyhow::bail!(
            "No Gmail access token: set {} or write {}",
            ENV_ACCESS_TOKEN,
            file.path().display()
        );
    }
    Ok(Box::new(file))
}
