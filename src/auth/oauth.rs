//! OAuth client credentials and the refresh-token exchange.

use std::io::ErrorKind;
use std::path::Path;

use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthType, AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use serde::Deserialize;

use super::error::AuthError;
use super::StoredToken;

pub const OAUTH_CLIENT_FILENAME: &str = "oauth_client.json";

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// The `installed` (or `web`) section of a client secret file downloaded
/// from the Google Cloud console.
#[derive(Clone, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<OAuthClientConfig>,
    web: Option<OAuthClientConfig>,
}

impl OAuthClientConfig {
    pub fn from_json(data: &[u8]) -> Result<Self, AuthError> {
        let file: ClientSecretFile = serde_json::from_slice(data)?;
        file.installed.or(file.web).ok_or(AuthError::ClientConfig)
    }

    /// Read `<config_dir>/oauth_client.json`. `None` when the file is absent.
    pub async fn load(config_dir: &Path) -> Result<Option<Self>, AuthError> {
        let path = config_dir.join(OAUTH_CLIENT_FILENAME);
        match tokio::fs::read(&path).await {
            Ok(data) => Self::from_json(&data).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(AuthError::Io { path, source }),
        }
    }

    fn client(&self) -> Result<BasicClient, AuthError> {
        Ok(BasicClient::new(
            ClientId::new(self.client_id.clone()),
            self.client_secret.clone().map(ClientSecret::new),
            AuthUrl::new(self.auth_uri.clone())?,
            Some(TokenUrl::new(self.token_uri.clone())?),
        )
        .set_auth_type(AuthType::RequestBody))
    }

    /// Trade the token's refresh token for a new access token. The refresh
    /// token is carried over when the server does not rotate it.
    pub async fn refresh(&self, token: &StoredToken) -> Result<StoredToken, AuthError> {
        let refresh = token
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;
        let response = self
            .client()?
            .exchange_refresh_token(&RefreshToken::new(refresh))
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::Refresh(e.to_string()))?;

        let expiry = response
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        Ok(StoredToken {
            access_token: response.access_token().secret().clone(),
            token_type: token.token_type.clone(),
            refresh_token: response
                .refresh_token()
                .map(|t| t.secret().clone())
                .or_else(|| token.refresh_token.clone()),
            expiry,
        })
    }
}
