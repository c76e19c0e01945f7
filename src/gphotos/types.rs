use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Processing status reported for videos that are ready to download.
pub const VIDEO_READY: &str = "READY";

/// Page size used for every media item search.
pub const SEARCH_PAGE_SIZE: u32 = 100;

/// Page size used when listing albums (the API caps this at 50).
pub const ALBUM_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub media_metadata: MediaMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<PhotoMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Whether an item is downloaded as a still image or as a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaItem {
    pub fn kind(&self) -> MediaKind {
        if self.media_metadata.video.is_some() || self.mime_type.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Photo
        }
    }

    /// Video processing status, `None` for photos or when the server omitted it.
    pub fn video_status(&self) -> Option<&str> {
        self.media_metadata
            .video
            .as_ref()
            .and_then(|v| v.status.as_deref())
    }

    /// Parse the RFC 3339 capture timestamp. `None` when absent or malformed.
    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.media_metadata.creation_time.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_items_count: Option<String>,
}

impl Album {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    /// Reported total item count; the API sends it as a decimal string.
    pub fn total_items(&self) -> u64 {
        self.media_items_count
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemsPage {
    #[serde(default)]
    pub media_items: Vec<MediaItem>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumsPage {
    #[serde(default)]
    pub albums: Vec<Album>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
}

impl SearchRequest {
    /// Items captured between `start` and `end`, both days inclusive.
    pub fn date_range(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            page_size: SEARCH_PAGE_SIZE,
            filters: Some(Filters {
                date_filter: Some(DateFilter {
                    ranges: vec![DateRange {
                        start_date: start.into(),
                        end_date: end.into(),
                    }],
                }),
                ..Filters::default()
            }),
            ..Self::default()
        }
    }

    pub fn album(album_id: impl Into<String>) -> Self {
        Self {
            album_id: Some(album_id.into()),
            page_size: SEARCH_PAGE_SIZE,
            ..Self::default()
        }
    }

    /// Favorites only, archived items included.
    pub fn favorites() -> Self {
        Self {
            page_size: SEARCH_PAGE_SIZE,
            filters: Some(Filters {
                include_archived_media: true,
                feature_filter: Some(FeatureFilter {
                    included_features: vec!["FAVORITES".to_string()],
                }),
                ..Filters::default()
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_filter: Option<DateFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_filter: Option<FeatureFilter>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_archived_media: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateFilter {
    pub ranges: Vec<DateRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: Date,
    pub end_date: Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Date {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl From<NaiveDate> for Date {
    fn from(d: NaiveDate) -> Self {
        Self {
            year: d.year(),
            month: d.month(),
            day: d.day(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFilter {
    pub included_features: Vec<String>,
}
