use std::path::PathBuf;

use thiserror::Error;

/// Per-item failures of the fetch/write unit.
///
/// None of these abort a campaign: the worker logs them and moves on.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("video {filename} is not yet processed")]
    NotProcessed { filename: String },

    #[error("Non 2xx status {status} returned for URL {url}, body: {body}")]
    HttpStatus { status: u16, url: String, body: String },

    #[error("error fetching data from {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("error creating dest dir {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error changing times on {}: {source}", path.display())]
    Timestamps {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Whether the bytes reached disk despite the error.
    pub fn file_written(&self) -> bool {
        matches!(self, FetchError::Timestamps { .. })
    }
}
