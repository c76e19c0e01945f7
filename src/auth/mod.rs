//! Stored OAuth credentials.
//!
//! Obtaining the first token is done elsewhere. This module loads
//! `token.json` from the config directory, presents it on every request and
//! refreshes it through `oauth_client.json` once it expires, writing the
//! new token back.

pub mod error;
pub mod oauth;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use reqwest::header::HeaderValue;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use self::error::AuthError;
use self::oauth::OAuthClientConfig;

pub const TOKEN_FILENAME: &str = "token.json";

/// Tokens this close to their expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 10;

#[cfg(unix)]
const TOKEN_FILE_MODE: u32 = 0o600;

/// Default config directory: `~/.config/gphotobackup`.
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".config")
        .join("gphotobackup")
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// A zero timestamp (year 1) means the token never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl StoredToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) if expiry.timestamp() > 0 => {
                expiry - Duration::seconds(EXPIRY_MARGIN_SECS) <= now
            }
            _ => false,
        }
    }

    /// `Authorization` header value, marked sensitive.
    pub fn header_value(&self) -> Result<HeaderValue, AuthError> {
        let scheme = if self.token_type.is_empty() {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        let mut value = HeaderValue::from_str(&format!("{} {}", scheme, self.access_token))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Read `<config_dir>/token.json`.
pub async fn load_token(config_dir: &Path) -> Result<StoredToken, AuthError> {
    let path = config_dir.join(TOKEN_FILENAME);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(AuthError::Missing { path }),
        Err(source) => return Err(AuthError::Io { path, source }),
    };
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(AuthError::Empty { path });
    }
    let token: StoredToken = serde_json::from_slice(&data)?;
    if token.access_token.is_empty() {
        return Err(AuthError::Empty { path });
    }
    Ok(token)
}

/// Replace `<config_dir>/token.json` with `token`, readable only by the
/// owner. Written to a temporary sibling and renamed into place.
pub async fn save_token(config_dir: &Path, token: &StoredToken) -> Result<(), AuthError> {
    let path = config_dir.join(TOKEN_FILENAME);
    let tmp = config_dir.join(format!("{}.tmp", TOKEN_FILENAME));
    let data = serde_json::to_vec_pretty(token)?;

    let write = async {
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        options.mode(TOKEN_FILE_MODE);
        let mut file = options.open(&tmp).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await
    };
    if let Err(source) = write.await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(AuthError::Io { path, source });
    }
    Ok(())
}

/// Plain HTTP client shared by the library API and content downloads.
/// Credentials are attached per request from a [`TokenSource`].
pub fn http_client() -> Result<Client, AuthError> {
    Ok(Client::builder()
        .user_agent(concat!("gphotobackup/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// The current token, refreshed on demand.
///
/// Concurrent callers share one refresh: the lock is held across the
/// exchange so only the first caller to see an expired token performs it.
pub struct TokenSource {
    current: Mutex<StoredToken>,
    oauth: Option<OAuthClientConfig>,
    /// Where refreshed tokens are saved; `None` keeps them in memory only.
    save_dir: Option<PathBuf>,
    warned: AtomicBool,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("oauth", &self.oauth)
            .field("save_dir", &self.save_dir)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    pub fn new(
        token: StoredToken,
        oauth: Option<OAuthClientConfig>,
        save_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            current: Mutex::new(token),
            oauth,
            save_dir,
            warned: AtomicBool::new(false),
        }
    }

    /// Load `token.json` and, when present, `oauth_client.json` from
    /// `config_dir`. Refreshed tokens are saved back there.
    pub async fn load(config_dir: &Path) -> Result<Self, AuthError> {
        let token = load_token(config_dir).await?;
        let oauth = OAuthClientConfig::load(config_dir).await?;
        if oauth.is_none() {
            tracing::debug!(
                "No {} in {}; expired tokens cannot be refreshed",
                oauth::OAUTH_CLIENT_FILENAME,
                config_dir.display()
            );
        }
        Ok(Self::new(token, oauth, Some(config_dir.to_path_buf())))
    }

    /// `Authorization` header for the next request, refreshing first when
    /// the token has expired and can be refreshed.
    pub async fn authorization(&self) -> Result<HeaderValue, AuthError> {
        let mut token = self.current.lock().await;
        if token.is_expired_at(Utc::now()) {
            match (&self.oauth, token.refresh_token.is_some()) {
                (Some(oauth), true) => {
                    let fresh = oauth.refresh(&token).await?;
                    tracing::info!(expiry = ?fresh.expiry, "Refreshed access token");
                    if let Some(dir) = &self.save_dir {
                        if let Err(e) = save_token(dir, &fresh).await {
                            tracing::warn!("Could not save refreshed token: {}", e);
                        }
                    }
                    *token = fresh;
                }
                _ => {
                    if !self.warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            expiry = ?token.expiry,
                            "Stored access token has expired and cannot be refreshed; \
                             requests will likely be rejected"
                        );
                    }
                }
            }
        }
        token.header_value()
    }
}
