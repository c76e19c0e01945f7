//! Existing-file reconciliation for album and favorites campaigns.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;

/// Outcome of matching one remote item's filename against the local listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// A local file with this name existed and is now claimed.
    Matched,
    /// The name was already claimed by an earlier remote item.
    Duplicate,
    /// No local file with this name; the item will be downloaded.
    Missing,
}

/// Filenames found in one destination subdirectory, each flagged once a
/// remote item claims it. Lives for a single campaign and is only touched by
/// the session task, so it needs no locking.
#[derive(Debug, Default)]
pub struct ExistingFiles {
    files: HashMap<String, bool>,
}

impl ExistingFiles {
    /// Number of entries found by the scan, plus any names claimed since.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Record that a remote item maps to `filename`.
    pub fn observe(&mut self, filename: &str) -> Observation {
        match self.files.get_mut(filename) {
            Some(true) => Observation::Duplicate,
            Some(seen) => {
                *seen = true;
                Observation::Matched
            }
            None => {
                self.files.insert(filename.to_string(), true);
                Observation::Missing
            }
        }
    }

    /// Local files no remote item claimed, sorted by name.
    pub fn extras(&self) -> Vec<&str> {
        let mut extra: Vec<&str> = self
            .files
            .iter()
            .filter(|(_, seen)| !**seen)
            .map(|(name, _)| name.as_str())
            .collect();
        extra.sort_unstable();
        extra
    }
}

impl<S: Into<String>> FromIterator<S> for ExistingFiles {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().map(|name| (name.into(), false)).collect(),
        }
    }
}

/// List the entries of `root/subdir`, one level deep.
///
/// A directory that does not exist or cannot be read yields an empty set:
/// nothing has been backed up there yet.
pub async fn scan(root: &Path, subdir: &str) -> ExistingFiles {
    let dir = root.join(subdir);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(dir = %dir.display(), "No existing directory to reconcile");
            return ExistingFiles::default();
        }
        Err(e) => {
            tracing::error!("Error opening {} to count: {}", dir.display(), e);
            return ExistingFiles::default();
        }
    };

    let mut names = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                // Item names are always UTF-8, so such an entry can never match.
                Err(raw) => tracing::warn!(
                    "Skipping non UTF-8 entry {} in {}",
                    Path::new(&raw).display(),
                    dir.display()
                ),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Error reading entries of {}: {}", dir.display(), e);
                return ExistingFiles::default();
            }
        }
    }
    names.into_iter().collect()
}
