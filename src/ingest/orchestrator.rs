use anyhow::Context;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::change::{self, Decision};
use super::reconciler::Reconciler;
use super::scheduler::Job;
use crate::config::FetchSettings;
use crate::feed::{fetch_feed, FeedNormalizer, InvalidFeedError};
use crate::storage::{Database, DatabaseError, Outlet};

/// Outlets processed at once when nothing else is configured
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Failure of one outlet's pass. The outlet keeps its previous watermark.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Feed(#[from] InvalidFeedError),

    #[error("Failed to store outlet state: {0}")]
    Store(#[from] DatabaseError),
}

/// What a successful pass over one outlet did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutletOutcome {
    Ingested {
        articles_created: usize,
        entries_skipped: usize,
    },
    Unchanged,
}

/// Totals for one run over every outlet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub outlets: usize,
    pub ingested: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Outlets never started because the run was cancelled
    pub cancelled: usize,
    pub articles_created: usize,
    pub entries_skipped: usize,
}

/// Drives fetch, change detection and reconciliation for every outlet.
#[derive(Clone)]
pub struct Ingestor {
    db: Database,
    client: reqwest::Client,
    settings: FetchSettings,
    concurrency: usize,
}

impl Ingestor {
    pub fn new(db: Database, client: reqwest::Client, settings: FetchSettings) -> Self {
        Self {
            db,
            client,
            settings,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Outlets in flight at once; 0 is treated as 1 (sequential).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// One pass over every registered outlet.
    ///
    /// Only failing to list the outlets is an error; a failing outlet is
    /// logged and counted in the summary. Once `cancel` fires, outlets that
    /// have not started yet are skipped while started ones run to the end.
    #[tracing::instrument(skip_all, fields(concurrency = self.concurrency))]
    pub async fn run_once(&self, cancel: &CancellationToken) -> anyhow::Result<RunSummary> {
        let mut outlets = self
            .db
            .list_outlets()
            .await
            .context("Failed to list outlets")?;
        outlets.sort_by_key(|o| o.id);

        tracing::info!(outlets = outlets.len(), "Starting ingestion run");

        let mut summary = RunSummary {
            outlets: outlets.len(),
            ..RunSummary::default()
        };

        let results: Vec<Option<Result<OutletOutcome, IngestError>>> = stream::iter(outlets)
            .map(|outlet| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let outlet_id = outlet.id;
                let rss_url = outlet.rss_url.clone();
                let result = self.ingest_outlet(outlet).await;
                if let Err(e) = &result {
                    tracing::error!(
                        outlet_id = outlet_id,
                        rss_url = %rss_url,
                        error = %e,
                        "Outlet ingestion failed"
                    );
                }
                Some(result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                None => summary.cancelled += 1,
                Some(Ok(OutletOutcome::Unchanged)) => summary.unchanged += 1,
                Some(Ok(OutletOutcome::Ingested {
                    articles_created,
                    entries_skipped,
                })) => {
                    summary.ingested += 1;
                    summary.articles_created += articles_created;
                    summary.entries_skipped += entries_skipped;
                }
                Some(Err(_)) => summary.failed += 1,
            }
        }

        tracing::info!(
            outlets = summary.outlets,
            ingested = summary.ingested,
            unchanged = summary.unchanged,
            failed = summary.failed,
            cancelled = summary.cancelled,
            articles_created = summary.articles_created,
            "Ingestion run finished"
        );

        Ok(summary)
    }

    /// Fetch, check and reconcile a single outlet.
    ///
    /// The watermark is written only after every entry has been handled, so
    /// an interrupted or failed pass is retried in full next time.
    #[tracing::instrument(skip_all, fields(outlet_id = outlet.id, rss_url = %outlet.rss_url))]
    pub async fn ingest_outlet(&self, outlet: Outlet) -> Result<OutletOutcome, IngestError> {
        let bytes = fetch_feed(&self.client, &outlet.rss_url, &self.settings)
            .await
            .map_err(InvalidFeedError::from)?;
        let feed = FeedNormalizer::new(bytes).with_source_url(outlet.rss_url.clone());
        let channel = feed.channel()?;

        let watermark = match change::evaluate(outlet.updated_at, channel.updated_at, Utc::now()) {
            Decision::Unchanged => {
                tracing::info!(
                    updated_at = ?outlet.updated_at,
                    "Feed unchanged since last pass"
                );
                return Ok(OutletOutcome::Unchanged);
            }
            Decision::Ingest { watermark } => watermark,
        };

        let entries = feed.entries()?;
        let result = Reconciler::new(&self.db).reconcile(&outlet, entries).await;

        // Metadata may have been refreshed by a registration meanwhile
        if !self.db.set_outlet_watermark(outlet.id, watermark).await? {
            tracing::warn!("Outlet removed during ingestion, watermark not stored");
        }

        tracing::info!(
            created = result.created.len(),
            skipped = result.skipped.len(),
            watermark = %watermark,
            "Ingested feed"
        );

        Ok(OutletOutcome::Ingested {
            articles_created: result.created.len(),
            entries_skipped: result.skipped.len(),
        })
    }
}

impl Job for Ingestor {
    async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.run_once(cancel).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewOutlet;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ONE_ITEM: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
<title>One</title>
<link>http://example.org/</link>
<description>One item</description>
<lastBuildDate>Mon, 01 Jan 2024 12:00:00 GMT</lastBuildDate>
<item>
<title>Only entry</title>
<link>http://example.org/only</link>
<pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
</item>
</channel></rss>"#;

    fn settings() -> FetchSettings {
        FetchSettings {
            max_retries: 0,
            retry_base_delay_ms: 1,
            ..FetchSettings::default()
        }
    }

    async fn setup(server: &MockServer, feed_path: &str) -> (Ingestor, Outlet) {
        let db = Database::open(":memory:").await.unwrap();
        let outlet = db
            .insert_outlet(&NewOutlet {
                name: "One".to_string(),
                url: "http://example.org/".to_string(),
                rss_url: format!("{}{}", server.uri(), feed_path),
                description: None,
                language: None,
            })
            .await
            .unwrap();
        let ingestor = Ingestor::new(db, reqwest::Client::new(), settings()).with_concurrency(1);
        (ingestor, outlet)
    }

    async fn serve(server: &MockServer, feed_path: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(feed_path))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_ingest_outlet_advances_watermark() {
        let server = MockServer::start().await;
        serve(&server, "/rss", ONE_ITEM).await;
        let (ingestor, outlet) = setup(&server, "/rss").await;

        let outcome = ingestor.ingest_outlet(outlet.clone()).await.unwrap();
        assert_eq!(
            outcome,
            OutletOutcome::Ingested {
                articles_created: 1,
                entries_skipped: 0
            }
        );

        let stored = ingestor.db.get_outlet(outlet.id).await.unwrap().unwrap();
        assert_eq!(
            stored.updated_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_watermark_write_keeps_concurrent_metadata() {
        let server = MockServer::start().await;
        serve(&server, "/rss", ONE_ITEM).await;
        let (ingestor, stale) = setup(&server, "/rss").await;

        // Re-registered after the run listed the outlet
        ingestor
            .db
            .insert_outlet(&NewOutlet {
                name: "Renamed".to_string(),
                url: stale.url.clone(),
                rss_url: stale.rss_url.clone(),
                description: Some("Fresh".to_string()),
                language: None,
            })
            .await
            .unwrap();

        ingestor.ingest_outlet(stale.clone()).await.unwrap();

        let stored = ingestor.db.get_outlet(stale.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.description.as_deref(), Some("Fresh"));
        assert_eq!(
            stored.updated_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_unchanged_feed_is_not_reconciled() {
        let server = MockServer::start().await;
        serve(&server, "/rss", ONE_ITEM).await;
        let (ingestor, outlet) = setup(&server, "/rss").await;

        ingestor.ingest_outlet(outlet.clone()).await.unwrap();
        let stored = ingestor.db.get_outlet(outlet.id).await.unwrap().unwrap();
        let outcome = ingestor.ingest_outlet(stored).await.unwrap();
        assert_eq!(outcome, OutletOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_watermark() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let (ingestor, outlet) = setup(&server, "/missing").await;

        let err = ingestor.ingest_outlet(outlet.clone()).await.unwrap_err();
        assert!(matches!(err, IngestError::Feed(InvalidFeedError::Fetch(_))));

        let stored = ingestor.db.get_outlet(outlet.id).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, None);
    }

    #[tokio::test]
    async fn test_run_once_on_empty_store() {
        let empty = Ingestor::new(
            Database::open(":memory:").await.unwrap(),
            reqwest::Client::new(),
            settings(),
        );
        let summary = empty.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_no_outlets() {
        let server = MockServer::start().await;
        serve(&server, "/rss", ONE_ITEM).await;
        let (ingestor, outlet) = setup(&server, "/rss").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = ingestor.run_once(&cancel).await.unwrap();
        assert_eq!(summary.outlets, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.ingested, 0);

        let stored = ingestor.db.get_outlet(outlet.id).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, None);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_concurrency_means_sequential() {
        let db = Database::open(":memory:").await.unwrap();
        let ingestor =
            Ingestor::new(db, reqwest::Client::new(), settings()).with_concurrency(0);
        assert_eq!(ingestor.concurrency, 1);
    }
}
