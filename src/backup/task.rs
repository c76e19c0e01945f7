use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::namer::{self, Destination};
use crate::gphotos::MediaItem;

/// A remote item bound to its campaign context, ready for a worker.
#[derive(Debug)]
pub struct QueuedTask {
    pub item: MediaItem,
    root: PathBuf,
    subdir: Option<String>,
    /// `None` when the item carried no parseable capture time.
    pub created: Option<DateTime<Utc>>,
    pub enqueued_at: Instant,
}

impl QueuedTask {
    pub fn new(item: MediaItem, root: &Path, subdir: Option<&str>) -> Self {
        let created = item.creation_time();
        if created.is_none() {
            tracing::error!(
                "Error parsing timestamp {:?} for id {}",
                item.media_metadata.creation_time,
                item.id
            );
        }
        Self {
            item,
            root: root.to_path_buf(),
            subdir: subdir.map(str::to_owned),
            created,
            enqueued_at: Instant::now(),
        }
    }

    pub fn destination(&self) -> Destination {
        namer::destination(
            &self.root,
            self.subdir.as_deref(),
            self.created.as_ref(),
            &self.item.filename,
            &self.item.id,
        )
    }

    /// Leaf filename, as compared against an existing-file listing.
    pub fn filename(&self) -> String {
        namer::item_filename(&self.item.filename, &self.item.id, false)
    }
}
