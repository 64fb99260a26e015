//! Access token sources for the Gmail client
//!
//! Obtaining and refreshing OAuth tokens happens outside this crate. The
//! client only needs a bearer token per request; these providers hand out
//! one that something else has already minted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Token file name in the mailsync config directory
const TOKEN_FILE: &str = "gmail-token.json";

/// Seconds of validity a token must have left to be handed out
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Source of bearer tokens for Gmail API requests
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Result<String>;
}

/// A fixed token, e.g. from `MAILSYNC_ACCESS_TOKEN`
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Token data as written by the credential bootstrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds)
    pub expires_at: Option<i64>,
}

impl StoredToken {
    /// Whether the token is still usable at `now` (Unix seconds)
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.expires_at
            .is_none_or(|expires_at| expires_at > now + EXPIRY_MARGIN_SECS)
    }
}

/// Reads the stored token file on every request
///
/// An external process keeps the file fresh; an expired token is reported
/// as an error rather than refreshed here.
pub struct StoredTokenFile {
    path: PathBuf,
}

impl StoredTokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/mailsync/gmail-token.json`
    pub fn default_location() -> Result<Self> {
        let path =
            config::config_path(TOKEN_FILE).context("Could not determine config directory")?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoredToken> {
        config::load_json_file(&self.path)
    }
}

impl TokenProvider for StoredTokenFile {
    fn access_token(&self) -> Result<String> {
        let token = self.load()?;
        if !token.is_valid_at(chrono::Utc::now().timestamp()) {
            anyhow::bail!("Stored access token in {} has expired", self.path.display());
        }
        Ok(token.access_token)
    }
}
