//! The fetch/write unit: one item in, one file on disk out.

use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::error::FetchError;
use super::task::QueuedTask;
use super::transport::ContentTransport;
use crate::gphotos::types::VIDEO_READY;
use crate::gphotos::{MediaItem, MediaKind};

/// Base URL suffix selecting the original bytes of a photo.
pub const PHOTO_DOWNLOAD_SUFFIX: &str = "=d";
/// Base URL suffix selecting the processed video file.
pub const VIDEO_DOWNLOAD_SUFFIX: &str = "=dv";

/// Suffix of the in-progress file a download is written to before it is
/// renamed onto its final name.
pub const PART_SUFFIX: &str = ".part";

#[cfg(unix)]
const DIR_MODE: u32 = 0o755;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// What happened to an item that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Written { bytes: usize },
    AlreadyExists,
}

/// Resolve the download URL for an item, refusing videos that are still
/// being processed server-side.
pub fn content_url(item: &MediaItem) -> Result<String, FetchError> {
    match item.kind() {
        MediaKind::Video => {
            if item.video_status() != Some(VIDEO_READY) {
                return Err(FetchError::NotProcessed {
                    filename: item.filename.clone(),
                });
            }
            Ok(format!("{}{}", item.base_url, VIDEO_DOWNLOAD_SUFFIX))
        }
        MediaKind::Photo => Ok(format!("{}{}", item.base_url, PHOTO_DOWNLOAD_SUFFIX)),
    }
}

/// Shared by every worker of a session: the transport and the lock that
/// serializes directory creation.
#[derive(Clone)]
pub struct FetchWriter {
    transport: Arc<dyn ContentTransport>,
    dir_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for FetchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchWriter").finish_non_exhaustive()
    }
}

impl FetchWriter {
    pub fn new(transport: Arc<dyn ContentTransport>) -> Self {
        Self {
            transport,
            dir_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Make sure the destination exists, skip if the file is already there,
    /// otherwise fetch it, write it and restore its capture time.
    pub async fn fetch_and_write(&self, task: &QueuedTask) -> Result<FetchOutcome, FetchError> {
        let dest = task.destination();
        self.ensure_dir(&dest.dir).await?;

        if tokio::fs::metadata(&dest.path).await.is_ok() {
            return Ok(FetchOutcome::AlreadyExists);
        }

        let url = content_url(&task.item)?;
        let body = self.fetch(&url).await?;
        write_file(&dest.path, &body).await?;

        if let Some(created) = task.created {
            let path = dest.path.clone();
            let when = SystemTime::from(created);
            tokio::task::spawn_blocking(move || set_file_times(&path, when))
                .await
                .map_err(std::io::Error::other)
                .and_then(|r| r)
                .map_err(|source| FetchError::Timestamps {
                    path: dest.path.clone(),
                    source,
                })?;
        }

        Ok(FetchOutcome::Written { bytes: body.len() })
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<(), FetchError> {
        let _guard = self.dir_lock.lock().await;
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(DIR_MODE);
        builder
            .create(dir)
            .await
            .map_err(|source| FetchError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .transport
            .get(url)
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        if !response.is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status,
                url: url.to_string(),
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        Ok(response.body)
    }
}

/// Sibling of `path` holding an unfinished download.
fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(PART_SUFFIX);
    path.with_file_name(name)
}

/// Write `data` to a `.part` sibling and rename it onto `path`, so `path`
/// only ever appears complete. The part file is removed on failure.
async fn write_file(path: &Path, data: &[u8]) -> Result<(), FetchError> {
    let part = part_path(path);
    let result = match write_part(&part, data).await {
        Ok(()) => tokio::fs::rename(&part, path).await,
        Err(e) => Err(e),
    };
    if let Err(source) = result {
        if let Err(e) = tokio::fs::remove_file(&part).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %part.display(), error = %e, "Could not remove part file");
            }
        }
        return Err(FetchError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

async fn write_part(part: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    let mut file = options.open(part).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

/// Set both modification and access time of `path`.
fn set_file_times(path: &Path, when: SystemTime) -> std::io::Result<()> {
    let times = FileTimes::new().set_modified(when).set_accessed(when);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)
}
