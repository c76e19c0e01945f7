//! The backup engine.
//!
//! A [`Session`] pages through the remote library and feeds a bounded queue
//! drained by a pool of workers. Each campaign (plain search, favorites, one
//! album) spawns a fresh pool, waits for every enqueued item to finish, then
//! stops the pool before returning.

pub mod counter;
pub mod error;
pub mod fetch;
pub mod namer;
pub mod scan;
pub mod task;
pub mod transport;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::gphotos::{Album, LibrarySource, SearchRequest};
use counter::CompletionCounter;
use fetch::FetchWriter;
use scan::{ExistingFiles, Observation};
use task::QueuedTask;
use transport::ContentTransport;
use worker::WorkerHandle;

/// Bound on queued-but-unstarted tasks; paging blocks once it is reached.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 3;
/// Destination subdirectory for the favorites campaign.
pub const FAVORITES_DIR: &str = "favorites";
/// Parent of the per-album destination subdirectories.
pub const ALBUMS_DIR: &str = "albums";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub destination: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Emit per-item received/already-exists events.
    pub verbose: bool,
}

impl SessionConfig {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            verbose: false,
        }
    }
}

/// What one campaign did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CampaignReport {
    pub enqueued: usize,
    /// Remote items whose file was already on disk (reconciling campaigns).
    pub matched: usize,
    /// Remote items with no local file at reconciliation time.
    pub missing: usize,
    /// Remote items that mapped onto an already-claimed filename.
    pub duplicates: usize,
    /// Local files no remote item claimed.
    pub extra: usize,
    /// Paging stopped on an error from the remote source.
    pub search_failed: bool,
}

/// Outcome of the album campaign.
#[derive(Debug, Default)]
pub struct AlbumsReport {
    /// One entry per album that was actually searched, keyed by title.
    pub searched: Vec<(String, CampaignReport)>,
    /// Albums whose local file count already matched the remote total.
    pub skipped: usize,
    /// Listing albums failed part way through.
    pub list_failed: bool,
}

/// Drives backup campaigns against one destination root.
pub struct Session {
    source: Arc<dyn LibrarySource>,
    writer: FetchWriter,
    counter: Arc<CompletionCounter>,
    config: SessionConfig,
    shutdown: CancellationToken,
    span: tracing::Span,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("outstanding", &self.counter.outstanding())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        source: Arc<dyn LibrarySource>,
        transport: Arc<dyn ContentTransport>,
        config: SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let span = tracing::info_span!(
            "backup_session",
            destination = %config.destination.display(),
            workers = config.workers
        );
        Self {
            source,
            writer: FetchWriter::new(transport),
            counter: Arc::new(CompletionCounter::new()),
            config,
            shutdown,
            span,
        }
    }

    /// Lifetime completion-counter totals: (added, completed).
    pub fn counter_totals(&self) -> (u64, u64) {
        self.counter.totals()
    }

    /// Plain search: every matched item is enqueued, no reconciliation.
    pub async fn start(&self, request: &SearchRequest) -> CampaignReport {
        let span = self.span.clone();
        async {
            tracing::info!("Starting search backup");
            let report = self.start_internal(request, None, None).await;
            log_summary("search", &report);
            report
        }
        .instrument(span)
        .await
    }

    /// Reconciling search of favorites into the `favorites` subdirectory.
    pub async fn start_favorites(&self) -> CampaignReport {
        let span = self.span.clone();
        async {
            tracing::info!("Starting favorites backup");
            let existing = scan::scan(&self.config.destination, FAVORITES_DIR).await;
            let report = self
                .reconcile(&SearchRequest::favorites(), FAVORITES_DIR, existing)
                .await;
            log_summary("favorites", &report);
            report
        }
        .instrument(span)
        .await
    }

    /// Back up every album into `albums/<title>`, skipping albums whose
    /// local file count already equals the remote total.
    pub async fn start_albums(&self) -> AlbumsReport {
        let span = self.span.clone();
        async {
            tracing::info!("Starting album backup");
            let mut report = AlbumsReport::default();
            let mut token: Option<String> = None;
            'pages: loop {
                if self.shutdown.is_cancelled() {
                    tracing::info!("Shutdown requested, not listing further albums");
                    break;
                }
                let page = match self.source.albums_page(token.as_deref()).await {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::error!("Error listing albums: {}", e);
                        report.list_failed = true;
                        break;
                    }
                };
                for album in &page.albums {
                    if self.shutdown.is_cancelled() {
                        tracing::info!("Shutdown requested, skipping remaining albums");
                        break 'pages;
                    }
                    match self.backup_album(album).await {
                        Some(campaign) => {
                            report.searched.push((album.title().to_string(), campaign))
                        }
                        None => report.skipped += 1,
                    }
                }
                match page.next_page_token {
                    Some(next) if !next.is_empty() => token = Some(next),
                    _ => break,
                }
            }
            tracing::info!(
                searched = report.searched.len(),
                skipped = report.skipped,
                "Album backup finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// `None` when the album was skipped without a search.
    async fn backup_album(&self, album: &Album) -> Option<CampaignReport> {
        let subdir = format!("{}/{}", ALBUMS_DIR, namer::sanitize(album.title()));
        let existing = scan::scan(&self.config.destination, &subdir).await;
        let total = album.total_items();
        if existing.len() as u64 == total {
            tracing::info!(
                album = album.title(),
                total,
                "All items present locally, skipping album"
            );
            return None;
        }
        tracing::info!(
            album = album.title(),
            local = existing.len(),
            total,
            "Backing up album"
        );
        let report = self
            .reconcile(&SearchRequest::album(&album.id), &subdir, existing)
            .await;
        log_summary(album.title(), &report);
        Some(report)
    }

    /// Run a campaign against `existing`, then report every local file no
    /// remote item claimed.
    async fn reconcile(
        &self,
        request: &SearchRequest,
        subdir: &str,
        mut existing: ExistingFiles,
    ) -> CampaignReport {
        let mut report = self
            .start_internal(request, Some(subdir), Some(&mut existing))
            .await;
        for name in existing.extras() {
            tracing::warn!("Extra file {}/{}", subdir, name);
            report.extra += 1;
        }
        report
    }

    /// Spawn a pool, page `request` into it, drain, stop.
    async fn start_internal(
        &self,
        request: &SearchRequest,
        subdir: Option<&str>,
        mut existing: Option<&mut ExistingFiles>,
    ) -> CampaignReport {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let queue = Arc::new(Mutex::new(rx));
        let workers: Vec<WorkerHandle> = (0..self.config.workers.max(1))
            .map(|id| {
                worker::spawn(
                    id,
                    Arc::clone(&queue),
                    Arc::clone(&self.counter),
                    self.writer.clone(),
                    self.config.verbose,
                )
            })
            .collect();

        let mut report = CampaignReport::default();
        let mut token: Option<String> = None;
        loop {
            if self.shutdown.is_cancelled() {
                tracing::info!("Shutdown requested, not fetching further pages");
                break;
            }
            let page = match self.source.search_page(request, token.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!("Error searching media items: {}", e);
                    report.search_failed = true;
                    break;
                }
            };

            let count = page.media_items.len();
            self.counter.add(count);
            report.enqueued += count;
            tracing::info!(total = report.enqueued, "Enqueueing {} items", count);

            for item in page.media_items {
                let task = QueuedTask::new(item, &self.config.destination, subdir);
                if let Some(existing) = existing.as_deref_mut() {
                    let filename = task.filename();
                    match existing.observe(&filename) {
                        Observation::Matched => report.matched += 1,
                        Observation::Duplicate => {
                            tracing::warn!("Duplicate filename {}", filename);
                            report.duplicates += 1;
                        }
                        Observation::Missing => {
                            tracing::info!("Missing {}", filename);
                            report.missing += 1;
                        }
                    }
                }
                if let Err(e) = tx.send(task).await {
                    tracing::error!("Work queue closed, dropping {}", e.0.item.filename);
                    self.counter.done();
                }
            }

            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        self.counter.wait_zero().await;
        self.stop(workers).await;
        report
    }

    /// Signal every worker, wait for each acknowledgement, then join them.
    async fn stop(&self, mut workers: Vec<WorkerHandle>) {
        self.counter.add(workers.len());
        for worker in &mut workers {
            worker.signal_stop();
        }
        self.counter.wait_zero().await;
        join_all(workers.into_iter().map(WorkerHandle::join)).await;
        tracing::debug!("All workers stopped");
    }
}

fn log_summary(campaign: &str, report: &CampaignReport) {
    tracing::info!(
        enqueued = report.enqueued,
        matched = report.matched,
        missing = report.missing,
        duplicates = report.duplicates,
        extra = report.extra,
        search_failed = report.search_failed,
        "Finished {}",
        campaign
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::transport::ContentResponse;
    use crate::gphotos::{AlbumsPage, ApiError, MediaItem, MediaItemsPage};
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const FAKE_PAGE_SIZE: usize = 2;

    fn item(id: &str, filename: &str, created: &str) -> MediaItem {
        serde_json::from_value(json!({
            "id": id,
            "baseUrl": format!("https://lh3.example/{}", id),
            "mimeType": "image/jpeg",
            "filename": filename,
            "mediaMetadata": {"creationTime": created, "photo": {}}
        }))
        .unwrap()
    }

    fn album(id: &str, title: &str, count: usize) -> Album {
        serde_json::from_value(json!({
            "id": id,
            "title": title,
            "mediaItemsCount": count.to_string(),
        }))
        .unwrap()
    }

    /// In-memory library serving fixed-size pages.
    #[derive(Default)]
    struct FakeLibrary {
        plain: Vec<MediaItem>,
        favorites: Vec<MediaItem>,
        albums: Vec<Album>,
        album_items: HashMap<String, Vec<MediaItem>>,
        /// Fail the search request for this page index.
        fail_page: Option<usize>,
        search_calls: AtomicUsize,
    }

    impl FakeLibrary {
        fn items_for(&self, request: &SearchRequest) -> &[MediaItem] {
            if let Some(id) = &request.album_id {
                return self.album_items.get(id).map(Vec::as_slice).unwrap_or(&[]);
            }
            let favorites = request
                .filters
                .as_ref()
                .is_some_and(|f| f.feature_filter.is_some());
            if favorites {
                &self.favorites
            } else {
                &self.plain
            }
        }
    }

    fn page_of<T: Clone>(all: &[T], token: Option<&str>) -> (Vec<T>, Option<String>, usize) {
        let index: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let start = index * FAKE_PAGE_SIZE;
        let end = (start + FAKE_PAGE_SIZE).min(all.len());
        let next = (end < all.len()).then(|| (index + 1).to_string());
        (all[start.min(end)..end].to_vec(), next, index)
    }

    #[async_trait::async_trait]
    impl LibrarySource for FakeLibrary {
        async fn search_page(
            &self,
            request: &SearchRequest,
            page_token: Option<&str>,
        ) -> Result<MediaItemsPage, ApiError> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            let (media_items, next_page_token, index) =
                page_of(self.items_for(request), page_token);
            if self.fail_page == Some(index) {
                return Err(ApiError::Status {
                    status: 500,
                    body: "backend".into(),
                });
            }
            Ok(MediaItemsPage {
                media_items,
                next_page_token,
            })
        }

        async fn albums_page(&self, page_token: Option<&str>) -> Result<AlbumsPage, ApiError> {
            let (albums, next_page_token, _) = page_of(&self.albums, page_token);
            Ok(AlbumsPage {
                albums,
                next_page_token,
            })
        }
    }

    /// Serves every URL with its own text as body, except URLs containing
    /// `fail`, which get a 500.
    #[derive(Default)]
    struct FakeTransport {
        calls: AtomicUsize,
        delay: Option<Duration>,
        /// When set, every fetch holds until a permit is available.
        gate: Option<Arc<tokio::sync::Semaphore>>,
    }

    #[async_trait::async_trait]
    impl ContentTransport for FakeTransport {
        async fn get(&self, url: &str) -> anyhow::Result<ContentResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await?;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let status = if url.contains("fail") { 500 } else { 200 };
            Ok(ContentResponse {
                status,
                body: url.as_bytes().to_vec(),
            })
        }
    }

    fn session(
        root: &Path,
        library: Arc<FakeLibrary>,
        transport: Arc<FakeTransport>,
    ) -> Session {
        let mut config = SessionConfig::new(root);
        config.workers = 3;
        config.queue_capacity = 2;
        Session::new(library, transport, config, CancellationToken::new())
    }

    fn unfiltered() -> SearchRequest {
        SearchRequest {
            page_size: 100,
            ..Default::default()
        }
    }

    fn five_items() -> Vec<MediaItem> {
        (0..5)
            .map(|i| item(&format!("ID{}", i), &format!("img {}.jpg", i), "2021-06-15T12:00:00Z"))
            .collect()
    }

    #[tokio::test]
    async fn test_plain_search_downloads_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let library = Arc::new(FakeLibrary {
            plain: five_items(),
            ..Default::default()
        });
        let transport = Arc::new(FakeTransport::default());
        let s = session(tmp.path(), library.clone(), transport.clone());

        let request = unfiltered();
        let report = s.start(&request).await;
        assert_eq!(report.enqueued, 5);
        assert!(!report.search_failed);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
        // 5 items over pages of 2.
        assert_eq!(library.search_calls.load(Ordering::SeqCst), 3);

        let dir = tmp.path().join(namer::subdirectory(
            library.plain[0].creation_time().as_ref(),
            None,
        ));
        assert_eq!(std::fs::read_dir(dir).unwrap().count(), 5);
    }

    #[tokio::test]
    async fn test_second_run_fetches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let library = Arc::new(FakeLibrary {
            plain: five_items(),
            ..Default::default()
        });
        let request = unfiltered();

        let first = Arc::new(FakeTransport::default());
        session(tmp.path(), library.clone(), first.clone())
            .start(&request)
            .await;
        assert_eq!(first.calls.load(Ordering::SeqCst), 5);

        let second = Arc::new(FakeTransport::default());
        let report = session(tmp.path(), library, second.clone())
            .start(&request)
            .await;
        assert_eq!(report.enqueued, 5);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_counter_balanced_after_each_campaign() {
        let tmp = tempfile::tempdir().unwrap();
        let library = Arc::new(FakeLibrary {
            plain: five_items(),
            favorites: five_items(),
            ..Default::default()
        });
        let s = session(tmp.path(), library, Arc::new(FakeTransport::default()));
        let request = unfiltered();

        s.start(&request).await;
        let (added, completed) = s.counter_totals();
        assert_eq!(added, completed);
        // Five tasks plus one stop acknowledgement per worker.
        assert_eq!(added, 5 + 3);

        s.start_favorites().await;
        let (added, completed) = s.counter_totals();
        assert_eq!(added, completed);
        assert_eq!(added, 2 * (5 + 3));
    }

    #[tokio::test]
    async fn test_failing_item_does_not_stall_others() {
        let tmp = tempfile::tempdir().unwrap();
        let mut items = five_items();
        items.push(item("fail1", "bad.jpg", "2021-06-15T12:00:00Z"));
        items.push(item("VIDEO9", "clip.mp4", "2021-06-15T12:00:00Z"));
        // Unprocessed video.
        items[6].mime_type = "video/mp4".into();
        items[6].media_metadata.video = Some(crate::gphotos::types::VideoMetadata {
            status: Some("PROCESSING".into()),
        });
        let library = Arc::new(FakeLibrary {
            plain: items,
            ..Default::default()
        });
        let transport = Arc::new(FakeTransport::default());
        let s = session(tmp.path(), library, transport.clone());
        let request = unfiltered();

        let report = tokio::time::timeout(Duration::from_secs(10), s.start(&request))
            .await
            .expect("campaign stalled");
        assert_eq!(report.enqueued, 7);
        // The video is never requested; the failing photo is.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 6);
        let (added, completed) = s.counter_totals();
        assert_eq!(added, completed);
    }

    #[tokio::test]
    async fn test_search_error_drains_enqueued_work() {
        let tmp = tempfile::tempdir().unwrap();
        let library = Arc::new(FakeLibrary {
            plain: five_items(),
            fail_page: Some(1),
            ..Default::default()
        });
        let transport = Arc::new(FakeTransport {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let s = session(tmp.path(), library, transport.clone());
        let request = unfiltered();

        let report = s.start(&request).await;
        assert!(report.search_failed);
        assert_eq!(report.enqueued, 2);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_album_short_circuits_when_complete() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("albums").join("Trip_2020");
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..3 {
            std::fs::write(dir.join(format!("f{}.jpg", i)), b"x").unwrap();
        }
        let library = Arc::new(FakeLibrary {
            albums: vec![album("A1", "Trip 2020", 3)],
            ..Default::default()
        });
        let s = session(tmp.path(), library.clone(), Arc::new(FakeTransport::default()));

        let report = s.start_albums().await;
        assert_eq!(report.skipped, 1);
        assert!(report.searched.is_empty());
        assert_eq!(library.search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_album_reconciliation_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let items = vec![
            item("A", "one.jpg", "2021-01-01T00:00:00Z"),
            item("B", "two.jpg", "2021-01-01T00:00:00Z"),
            item("A", "one.jpg", "2021-01-01T00:00:00Z"),
        ];
        let dir = tmp.path().join("albums").join("Family");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("one-A.jpg"), b"x").unwrap();
        std::fs::write(dir.join("stale-Z.jpg"), b"x").unwrap();

        let library = Arc::new(FakeLibrary {
            albums: vec![album("F", "Family", 3)],
            album_items: HashMap::from([("F".to_string(), items)]),
            ..Default::default()
        });
        let transport = Arc::new(FakeTransport::default());
        let s = session(tmp.path(), library, transport.clone());

        let report = s.start_albums().await;
        assert_eq!(report.skipped, 0);
        let (title, campaign) = &report.searched[0];
        assert_eq!(title, "Family");
        assert_eq!(campaign.enqueued, 3);
        assert_eq!(campaign.matched, 1);
        assert_eq!(campaign.missing, 1);
        assert_eq!(campaign.duplicates, 1);
        assert_eq!(campaign.extra, 1);
        // Only two.jpg was absent on disk.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(dir.join("two-B.jpg").exists());
    }

    #[tokio::test]
    async fn test_favorites_land_in_favorites_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let library = Arc::new(FakeLibrary {
            favorites: vec![item("FAV1", "heart.png", "2018-02-14T08:00:00Z")],
            ..Default::default()
        });
        let s = session(tmp.path(), library, Arc::new(FakeTransport::default()));

        let report = s.start_favorites().await;
        assert_eq!(report.missing, 1);
        assert!(tmp.path().join("favorites").join("heart-FAV1.png").exists());
    }

    #[tokio::test]
    async fn test_cancelled_session_fetches_no_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let library = Arc::new(FakeLibrary {
            plain: five_items(),
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let s = Session::new(
            library.clone(),
            Arc::new(FakeTransport::default()),
            SessionConfig::new(tmp.path()),
            shutdown,
        );
        let request = unfiltered();

        let report = s.start(&request).await;
        assert_eq!(report.enqueued, 0);
        assert_eq!(library.search_calls.load(Ordering::SeqCst), 0);
        let (added, completed) = s.counter_totals();
        assert_eq!(added, completed);
    }

    #[tokio::test]
    async fn test_full_queue_stalls_paging() {
        let tmp = tempfile::tempdir().unwrap();
        let library = Arc::new(FakeLibrary {
            plain: (0..20)
                .map(|i| item(&format!("ID{}", i), &format!("img {}.jpg", i), "2021-06-15T12:00:00Z"))
                .collect(),
            ..Default::default()
        });
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let transport = Arc::new(FakeTransport {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        // 3 workers each hold one item and the queue holds 2 more, so the
        // sixth send blocks while the third page is being enqueued.
        let s = session(tmp.path(), library.clone(), transport.clone());
        let request = unfiltered();

        let controller = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let pages_while_blocked = library.search_calls.load(Ordering::SeqCst);
            let fetches_while_blocked = transport.calls.load(Ordering::SeqCst);
            gate.add_permits(3);
            (pages_while_blocked, fetches_while_blocked)
        };
        let campaign = async {
            tokio::time::timeout(Duration::from_secs(10), s.start(&request))
                .await
                .expect("campaign did not finish after release")
        };
        let (report, (pages_while_blocked, fetches_while_blocked)) =
            tokio::join!(campaign, controller);

        assert_eq!(pages_while_blocked, 3);
        assert!(fetches_while_blocked <= 3);
        assert_eq!(report.enqueued, 20);
        assert_eq!(library.search_calls.load(Ordering::SeqCst), 10);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 20);
        let (added, completed) = s.counter_totals();
        assert_eq!(added, completed);
    }
}
