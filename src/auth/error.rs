use std::path::PathBuf;

use thiserror::Error;

/// Failures loading, presenting or refreshing the stored OAuth token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token at {}; log in again to create one", path.display())]
    Missing { path: PathBuf },

    #[error("token file {} is empty; log in again", path.display())]
    Empty { path: PathBuf },

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed credentials file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("token cannot be sent as a header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("client secret file has neither an \"installed\" nor a \"web\" section")]
    ClientConfig,

    #[error("invalid OAuth endpoint: {0}")]
    Url(#[from] oauth2::url::ParseError),

    #[error("token has expired and carries no refresh token; log in again")]
    NoRefreshToken,

    #[error("refreshing access token failed: {0}")]
    Refresh(String),
}
