use thiserror::Error;
use url::Url;

use crate::config::FetchSettings;
use crate::feed::{fetch_feed, FeedNormalizer, InvalidFeedError};
use crate::storage::{Database, DatabaseError, NewOutlet, Outlet};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),

    #[error(transparent)]
    Feed(#[from] InvalidFeedError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Parse a feed URL, accepting only http and https.
pub fn validate_feed_url(raw: &str) -> Result<Url, RegistrationError> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(RegistrationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Register an outlet from its feed URL.
///
/// The channel is fetched once so the outlet can be named after it. A URL
/// that is already registered has its metadata refreshed. Either way the
/// watermark starts empty, so the next pass ingests every entry.
#[tracing::instrument(skip(db, client, settings))]
pub async fn register_outlet(
    db: &Database,
    client: &reqwest::Client,
    settings: &FetchSettings,
    rss_url: &str,
) -> Result<Outlet, RegistrationError> {
    let url = validate_feed_url(rss_url)?;

    let bytes = fetch_feed(client, url.as_str(), settings)
        .await
        .map_err(InvalidFeedError::from)?;
    let channel = FeedNormalizer::new(bytes)
        .with_source_url(url.as_str())
        .channel()?;

    let outlet = db
        .insert_outlet(&NewOutlet {
            name: channel.title,
            url: channel.site_url.unwrap_or_else(|| url.to_string()),
            rss_url: url.to_string(),
            description: channel.subtitle,
            language: channel.language,
        })
        .await?;

    tracing::info!(outlet_id = outlet.id, name = %outlet.name, "Registered outlet");
    Ok(outlet)
}
