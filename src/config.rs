use std::path::PathBuf;

use anyhow::Context;
use chrono::{Local, NaiveDate};

use crate::cli::BackupArgs;
use crate::gphotos::SearchRequest;

/// What the plain-search campaign of a backup run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlainSearch {
    Album(String),
    /// Inclusive date range in the user's local calendar.
    DateRange { start: NaiveDate, end: NaiveDate },
}

impl PlainSearch {
    pub fn to_request(&self) -> SearchRequest {
        match self {
            PlainSearch::Album(id) => SearchRequest::album(id.as_str()),
            PlainSearch::DateRange { start, end } => SearchRequest::date_range(*start, *end),
        }
    }
}

/// Validated settings for one `backup` invocation.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub out: PathBuf,
    pub search: PlainSearch,
    pub workers: usize,
    pub albums: bool,
    pub favorites: bool,
    pub verbose: bool,
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl BackupConfig {
    pub fn from_cli(args: BackupArgs) -> anyhow::Result<Self> {
        Self::from_cli_at(args, Local::now().date_naive())
    }

    /// As [`from_cli`](Self::from_cli) with an explicit "today".
    pub(crate) fn from_cli_at(args: BackupArgs, today: NaiveDate) -> anyhow::Result<Self> {
        if args.workers == 0 {
            anyhow::bail!("--workers must be at least 1");
        }

        let search = match (&args.album_id, args.since_days, &args.start) {
            (Some(id), None, None) if !id.is_empty() => PlainSearch::Album(id.clone()),
            (None, Some(days), None) if days > 0 => PlainSearch::DateRange {
                start: today - chrono::Duration::days(i64::from(days)),
                end: today,
            },
            (None, None, Some(start)) => {
                let start = parse_date(start).context("invalid --start")?;
                let end = match args.end.as_deref() {
                    Some(end) => parse_date(end).context("invalid --end")?,
                    None => today,
                };
                if end < start {
                    anyhow::bail!("--end {} is before --start {}", end, start);
                }
                PlainSearch::DateRange { start, end }
            }
            _ => anyhow::bail!(
                "Must specify exactly one of --album-id, --since-days or --start[/--end]"
            ),
        };

        Ok(Self {
            out: expand_tilde(&args.out),
            search,
            workers: args.workers,
            albums: args.albums,
            favorites: args.favorites,
            verbose: args.verbose,
        })
    }
}

/// Parse a `YYYY-MM-DD` date.
pub(crate) fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Cannot parse '{}' as a date. Expected YYYY-MM-DD", s))
}
