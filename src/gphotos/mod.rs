//! Google Photos Library API: the remote item source the backup engine
//! pages through. The engine only sees the [`LibrarySource`] trait; the
//! reqwest implementation lives in [`client`].

pub mod client;
pub mod error;
pub mod types;

pub use client::PhotosClient;
pub use error::ApiError;
pub use types::{Album, AlbumsPage, MediaItem, MediaItemsPage, MediaKind, SearchRequest};

/// Paged access to the remote library.
///
/// Object-safe so the session can hold an `Arc<dyn LibrarySource>` and tests
/// can substitute an in-memory library.
#[async_trait::async_trait]
pub trait LibrarySource: Send + Sync {
    /// Fetch one page of search results. `page_token` is `None` for the first page.
    async fn search_page(
        &self,
        request: &SearchRequest,
        page_token: Option<&str>,
    ) -> Result<MediaItemsPage, ApiError>;

    /// Fetch one page of the user's albums.
    async fn albums_page(&self, page_token: Option<&str>) -> Result<AlbumsPage, ApiError>;
}

/// Collect every item matched by a search across all pages.
pub async fn search_all(
    source: &dyn LibrarySource,
    request: &SearchRequest,
) -> Result<Vec<MediaItem>, ApiError> {
    let mut items = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = source.search_page(request, token.as_deref()).await?;
        items.extend(page.media_items);
        match page.next_page_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => return Ok(items),
        }
    }
}

/// Collect every album across all pages.
pub async fn all_albums(source: &dyn LibrarySource) -> Result<Vec<Album>, ApiError> {
    let mut albums = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = source.albums_page(token.as_deref()).await?;
        albums.extend(page.albums);
        tracing::debug!(count = albums.len(), "Album pages fetched");
        match page.next_page_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => return Ok(albums),
        }
    }
}
