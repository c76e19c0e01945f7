use thiserror::Error;

/// Errors returned by the remote library while paging.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Library API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Auth(#[from] crate::auth::error::AuthError),
}
