use chrono::{DateTime, SubsecRound, Utc};
use feed_rs::model::{Entry, Feed, FeedType, Person};
use feed_rs::parser;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use thiserror::Error;

use super::fetcher::FetchError;

/// The document could not be turned into a supported RSS feed.
#[derive(Debug, Clone, Error)]
pub enum InvalidFeedError {
    /// Parsed fine, but declares a non-RSS format (Atom, JSON Feed)
    #[error("Feed does not contain valid RSS information (found {0})")]
    NotRss(String),
    /// feed-rs rejected the document
    #[error("Failed to parse feed data, is it a valid RSS feed? ({0})")]
    Malformed(String),
    /// The document never arrived
    #[error("Failed to fetch feed: {0}")]
    Fetch(String),
}

impl From<FetchError> for InvalidFeedError {
    fn from(err: FetchError) -> Self {
        InvalidFeedError::Fetch(err.to_string())
    }
}

/// Channel-level metadata of a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub title: String,
    pub subtitle: Option<String>,
    pub site_url: Option<String>,
    pub language: Option<String>,
    /// `None` when the channel carries neither `lastBuildDate` nor `pubDate`
    pub updated_at: Option<DateTime<Utc>>,
    pub source_url: Option<String>,
}

/// One feed item, before reconciliation.
///
/// Fields an article requires are still optional here; the reconciler
/// rejects the single entry when they are missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub url: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub content: Option<String>,
    pub authors: Vec<String>,
    pub tags: Vec<String>,
}

/// Parses a raw feed document into [`ChannelInfo`] and [`EntryInfo`] values.
///
/// The underlying parse runs at most once per normalizer, on the first call
/// to [`channel`](Self::channel) or [`entries`](Self::entries). Its outcome,
/// success or failure, is cached for every later call.
pub struct FeedNormalizer {
    bytes: Vec<u8>,
    source_url: Option<String>,
    parsed: OnceLock<Result<Feed, InvalidFeedError>>,
    parse_count: AtomicUsize,
}

impl FeedNormalizer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            source_url: None,
            parsed: OnceLock::new(),
            parse_count: AtomicUsize::new(0),
        }
    }

    /// Remember where the document came from; reported as `ChannelInfo::source_url`.
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// How many times the document has been parsed (0 or 1)
    pub fn parse_count(&self) -> usize {
        self.parse_count.load(Ordering::Relaxed)
    }

    fn feed(&self) -> Result<&Feed, InvalidFeedError> {
        self.parsed
            .get_or_init(|| {
                self.parse_count.fetch_add(1, Ordering::Relaxed);
                parse_rss(&self.bytes)
            })
            .as_ref()
            .map_err(|e| e.clone())
    }

    pub fn channel(&self) -> Result<ChannelInfo, InvalidFeedError> {
        let feed = self.feed()?;

        Ok(ChannelInfo {
            title: feed
                .title
                .as_ref()
                .map(|t| t.content.clone())
                .unwrap_or_default(),
            subtitle: feed.description.as_ref().map(|d| d.content.clone()),
            site_url: feed.links.first().map(|l| l.href.clone()),
            language: feed.language.clone(),
            // RSS 2.0: lastBuildDate, then the channel pubDate
            updated_at: feed.updated.or(feed.published).map(to_utc_seconds),
            source_url: self.source_url.clone(),
        })
    }

    /// Entries in document order
    pub fn entries(&self) -> Result<Vec<EntryInfo>, InvalidFeedError> {
        let feed = self.feed()?;

        let entries = feed
            .entries
            .iter()
            .map(|entry| EntryInfo {
                title: entry.title.as_ref().map(|t| t.content.clone()),
                summary: entry.summary.as_ref().map(|s| s.content.clone()),
                url: entry_url(entry),
                pub_date: entry.published.map(to_utc_seconds),
                // feed-rs keeps the first content representation only
                content: entry.content.as_ref().and_then(|c| c.body.clone()),
                authors: entry.authors.iter().filter_map(author_name).collect(),
                tags: entry.categories.iter().map(|c| c.term.clone()).collect(),
            })
            .collect();

        Ok(entries)
    }
}

fn parse_rss(bytes: &[u8]) -> Result<Feed, InvalidFeedError> {
    let feed = parser::parse(bytes).map_err(|e| {
        tracing::debug!(error = %e, "feed-rs rejected document");
        InvalidFeedError::Malformed(e.to_string())
    })?;

    match feed.feed_type {
        FeedType::RSS0 | FeedType::RSS1 | FeedType::RSS2 => Ok(feed),
        ref other => Err(InvalidFeedError::NotRss(format!("{:?}", other))),
    }
}

/// First `<link>`, else a `<guid>` that is itself an http(s) URL
fn entry_url(entry: &Entry) -> Option<String> {
    if let Some(link) = entry.links.first() {
        return Some(link.href.clone());
    }
    let guid = url::Url::parse(entry.id.trim()).ok()?;
    match guid.scheme() {
        "http" | "https" => Some(entry.id.trim().to_string()),
        _ => None,
    }
}

/// Display name of an item author.
///
/// feed-rs stores the text of an RSS `<author>` element as the email of a
/// person named "author". That text is either a plain name or
/// `email (Name)`, in which case the parenthesized part is the name.
fn author_name(person: &Person) -> Option<String> {
    let raw = match (&person.email, person.name.as_str()) {
        (Some(email), "author" | "") => email.as_str(),
        _ => person.name.as_str(),
    };
    let raw = raw.trim();

    let name = match (raw.find('('), raw.strip_suffix(')')) {
        (Some(open), Some(inner)) if open + 1 < inner.len() => {
            let candidate = inner[open + 1..].trim();
            if candidate.is_empty() {
                raw
            } else {
                candidate
            }
        }
        _ => raw,
    };

    (!name.is_empty()).then(|| name.to_string())
}

fn to_utc_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(0)
}
