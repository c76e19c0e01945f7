//! `print` subcommands: read-only views of the remote library.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::backup::namer::sanitize;
use crate::gphotos::{self, Album, LibrarySource, PhotosClient, SearchRequest};

/// One line of `print albums` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumSummary {
    /// Title as it appears under `albums/` on disk.
    pub name: String,
    pub id: String,
    pub size: u64,
}

/// Summaries sorted case-insensitively by name; ties keep listing order.
pub fn album_summaries(albums: &[Album]) -> Vec<AlbumSummary> {
    let mut summaries: Vec<AlbumSummary> = albums
        .iter()
        .map(|a| AlbumSummary {
            name: sanitize(a.title()),
            id: a.id.clone(),
            size: a.total_items(),
        })
        .collect();
    summaries.sort_by_cached_key(|s| s.name.to_lowercase());
    summaries
}

pub fn write_album_lines<W: Write>(mut w: W, summaries: &[AlbumSummary]) -> anyhow::Result<()> {
    for summary in summaries {
        serde_json::to_writer(&mut w, summary)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

pub async fn print_albums(source: &dyn LibrarySource, out: Option<&Path>) -> anyhow::Result<()> {
    let albums = gphotos::all_albums(source)
        .await
        .context("listing albums")?;
    tracing::info!(count = albums.len(), "Albums listed");
    let summaries = album_summaries(&albums);

    match out {
        None => write_album_lines(std::io::stdout().lock(), &summaries),
        Some(path) => {
            let mut options = std::fs::OpenOptions::new();
            options.create(true).write(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o644);
            }
            let file = options
                .open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            write_album_lines(std::io::BufWriter::new(file), &summaries)
        }
    }
}

pub async fn print_album(source: &dyn LibrarySource, album_id: &str) -> anyhow::Result<()> {
    let items = gphotos::search_all(source, &SearchRequest::album(album_id))
        .await
        .with_context(|| format!("searching album {}", album_id))?;
    for item in &items {
        println!("{}", serde_json::to_string_pretty(item)?);
    }
    tracing::info!(count = items.len(), "Album items listed");
    Ok(())
}

pub async fn print_item(client: &PhotosClient, item_id: &str) -> anyhow::Result<()> {
    let item = client
        .get_item(item_id)
        .await
        .with_context(|| format!("fetching item {}", item_id))?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}
