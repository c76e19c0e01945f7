//! Destination naming. Every path the engine writes to or compares against
//! is derived here, so the same remote item always lands on the same file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};

/// Directory used when an item has no usable capture time.
pub const UNKNOWN_DIR: &str = "unknown";

/// Where one item lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub dir: PathBuf,
    pub path: PathBuf,
    /// Same as `path` but with a shortened id; for log output only.
    pub short_path: PathBuf,
}

/// Replace every character that is not an ASCII letter, digit or underscore
/// with `_`. Remote filenames and album titles are untrusted, so this is what
/// keeps them from escaping the destination directory.
pub fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Shortened id for log lines: `...` followed by the eight characters that
/// precede the final one. Ids of eight characters or fewer are returned as-is.
fn short_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 8 {
        return id.to_string();
    }
    let tail: String = chars[chars.len() - 9..chars.len() - 1].iter().collect();
    format!("...{}", tail)
}

/// Build `sanitizedStem-id.ext` from an untrusted filename.
///
/// The extension is everything after the last `.`. Without a `.` the whole
/// name is sanitized and no id is appended.
pub fn item_filename(filename: &str, id: &str, short: bool) -> String {
    match filename.rfind('.') {
        Some(dot) => {
            let stem = sanitize(&filename[..dot]);
            let ext = sanitize(&filename[dot + 1..]);
            let disambiguator = if short { short_id(id) } else { id.to_string() };
            format!("{}-{}.{}", stem, disambiguator, ext)
        }
        None => sanitize(filename),
    }
}

/// Subdirectory for an item: the override when given, else the local capture
/// date as `YYYY/MM/DD`, else [`UNKNOWN_DIR`].
pub fn subdirectory(created: Option<&DateTime<Utc>>, subdir_override: Option<&str>) -> PathBuf {
    if let Some(dir) = subdir_override.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    match created {
        Some(ts) => {
            let local = ts.with_timezone(&Local);
            // Joined component-wise so the separator is native.
            let mut path = PathBuf::new();
            for part in local.format("%Y/%m/%d").to_string().split('/') {
                path.push(part);
            }
            path
        }
        None => PathBuf::from(UNKNOWN_DIR),
    }
}

/// Compute the destination directory, full path and log-friendly path.
pub fn destination(
    root: &Path,
    subdir_override: Option<&str>,
    created: Option<&DateTime<Utc>>,
    filename: &str,
    id: &str,
) -> Destination {
    let dir = root.join(subdirectory(created, subdir_override));
    let path = dir.join(item_filename(filename, id, false));
    let short_path = dir.join(item_filename(filename, id, true));
    Destination {
        dir,
        path,
        short_path,
    }
}
