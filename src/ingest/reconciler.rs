use thiserror::Error;

use crate::feed::EntryInfo;
use crate::storage::{
    Article, Author, CreateArticleError, Database, DatabaseError, DuplicateArticleError,
    NewArticle, Outlet, Tag,
};

// ============================================================================
// Error Types
// ============================================================================

/// An entry that could not become an article for a reason other than
/// already being stored.
#[derive(Debug, Error)]
pub enum EntryReconciliationError {
    #[error("Entry has no {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Why a single entry was skipped
#[derive(Debug, Error)]
pub enum EntryError {
    /// Already ingested on an earlier pass; expected and harmless
    #[error(transparent)]
    Duplicate(#[from] DuplicateArticleError),

    #[error(transparent)]
    Reconciliation(#[from] EntryReconciliationError),
}

impl From<DatabaseError> for EntryError {
    fn from(err: DatabaseError) -> Self {
        EntryError::Reconciliation(EntryReconciliationError::Store(err))
    }
}

impl From<CreateArticleError> for EntryError {
    fn from(err: CreateArticleError) -> Self {
        match err {
            CreateArticleError::Duplicate(dup) => EntryError::Duplicate(dup),
            CreateArticleError::Database(db) => db.into(),
        }
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

#[derive(Debug)]
pub struct SkippedEntry {
    pub entry: EntryInfo,
    pub error: EntryError,
}

/// Result of one reconciliation pass over a feed's entries
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub created: Vec<Article>,
    pub skipped: Vec<SkippedEntry>,
}

/// Turns feed entries into stored articles linked to authors and tags.
///
/// Every entry is handled on its own: a failure skips that entry and the
/// pass moves on. There is no batch transaction, so authors and tags
/// created for an entry whose article is then rejected stay in the store.
pub struct Reconciler<'a> {
    db: &'a Database,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn reconcile(&self, outlet: &Outlet, entries: Vec<EntryInfo>) -> Reconciliation {
        let mut result = Reconciliation::default();

        for entry in entries {
            match self.reconcile_entry(outlet, &entry).await {
                Ok(article) => {
                    tracing::debug!(
                        outlet_id = outlet.id,
                        article_id = article.id,
                        url = %article.url,
                        "Created article"
                    );
                    result.created.push(article);
                }
                Err(error) => {
                    match &error {
                        EntryError::Duplicate(dup) => {
                            tracing::warn!(
                                outlet_id = outlet.id,
                                url = %dup.url,
                                "Article already exists, skipping entry"
                            );
                        }
                        EntryError::Reconciliation(e) => {
                            tracing::error!(
                                outlet_id = outlet.id,
                                error = %e,
                                entry = ?entry,
                                "Failed to reconcile entry"
                            );
                        }
                    }
                    result.skipped.push(SkippedEntry { entry, error });
                }
            }
        }

        result
    }

    async fn reconcile_entry(
        &self,
        outlet: &Outlet,
        entry: &EntryInfo,
    ) -> Result<Article, EntryError> {
        let title = entry
            .title
            .clone()
            .ok_or(EntryReconciliationError::MissingField("title"))?;
        let url = entry
            .url
            .clone()
            .ok_or(EntryReconciliationError::MissingField("url"))?;
        let pub_date = entry
            .pub_date
            .ok_or(EntryReconciliationError::MissingField("pub_date"))?;

        let mut author_ids = Vec::with_capacity(entry.authors.len());
        for name in &entry.authors {
            let author = self.find_or_create_author(outlet.id, name).await?;
            if !author_ids.contains(&author.id) {
                author_ids.push(author.id);
            }
        }

        let mut tag_ids = Vec::with_capacity(entry.tags.len());
        for term in &entry.tags {
            let tag = self.find_or_create_tag(term).await?;
            if !tag_ids.contains(&tag.id) {
                tag_ids.push(tag.id);
            }
        }

        let article = self
            .db
            .create_article(&NewArticle {
                outlet_id: outlet.id,
                title,
                summary: entry.summary.clone().unwrap_or_default(),
                url,
                pub_date,
                content: entry.content.clone(),
                author_ids,
                tag_ids,
            })
            .await?;

        Ok(article)
    }

    /// Find-then-create; a concurrent pass that wins the insert race is
    /// picked up by reading again.
    async fn find_or_create_author(
        &self,
        outlet_id: i64,
        name: &str,
    ) -> Result<Author, DatabaseError> {
        if let Some(author) = self.db.find_author(outlet_id, name).await? {
            return Ok(author);
        }
        match self.db.create_author(outlet_id, name).await {
            Ok(author) => Ok(author),
            Err(DatabaseError::DuplicateAuthor { .. }) => self
                .db
                .find_author(outlet_id, name)
                .await?
                .ok_or_else(|| DatabaseError::DuplicateAuthor {
                    outlet_id,
                    name: name.to_string(),
                }),
            Err(e) => Err(e),
        }
    }

    async fn find_or_create_tag(&self, term: &str) -> Result<Tag, DatabaseError> {
        if let Some(tag) = self.db.find_tag(term).await? {
            return Ok(tag);
        }
        match self.db.create_tag(term).await {
            Ok(tag) => Ok(tag),
            Err(DatabaseError::DuplicateTag(_)) => self
                .db
                .find_tag(term)
                .await?
                .ok_or_else(|| DatabaseError::DuplicateTag(term.to_string())),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AuthorFilter, NewOutlet};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    async fn setup() -> (Database, Outlet) {
        let db = Database::open(":memory:").await.unwrap();
        let outlet = db
            .insert_outlet(&NewOutlet {
                name: "Example".to_string(),
                url: "http://example.org/".to_string(),
                rss_url: "http://example.org/rss".to_string(),
                description: None,
                language: None,
            })
            .await
            .unwrap();
        (db, outlet)
    }

    fn entry(n: u32) -> EntryInfo {
        EntryInfo {
            title: Some(format!("Entry {}", n)),
            summary: Some(format!("Summary {}", n)),
            url: Some(format!("http://example.org/entry/{}", n)),
            pub_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, n).unwrap()),
            content: None,
            authors: vec![],
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_entries_become_articles() {
        let (db, outlet) = setup().await;
        let mut first = entry(1);
        first.authors = vec!["Sample Author".to_string()];
        first.tags = vec!["Sample Tag".to_string()];

        let result = Reconciler::new(&db)
            .reconcile(&outlet, vec![first, entry(2)])
            .await;

        assert_eq!(result.created.len(), 2);
        assert!(result.skipped.is_empty());

        let article = &result.created[0];
        assert_eq!(article.outlet_id, outlet.id);
        assert_eq!(article.title, "Entry 1");
        assert_eq!(article.summary, "Summary 1");
        assert_eq!(article.tags, vec!["Sample Tag".to_string()]);
        assert_eq!(article.author_ids.len(), 1);

        let author = db
            .find_author(outlet.id, "Sample Author")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.author_ids, vec![author.id]);
    }

    #[tokio::test]
    async fn test_shared_author_created_once() {
        let (db, outlet) = setup().await;
        let entries: Vec<EntryInfo> = (1..=3)
            .map(|n| {
                let mut e = entry(n);
                e.authors = vec!["Jane Doe".to_string(), "Jane Doe".to_string()];
                e
            })
            .collect();

        let result = Reconciler::new(&db).reconcile(&outlet, entries).await;
        assert_eq!(result.created.len(), 3);

        let authors = db.list_authors(&AuthorFilter::default()).await.unwrap();
        assert_eq!(authors.len(), 1);
        for article in &result.created {
            assert_eq!(article.author_ids, vec![authors[0].id]);
        }
    }

    #[tokio::test]
    async fn test_existing_tag_is_reused() {
        let (db, outlet) = setup().await;
        let existing = db.create_tag("rust").await.unwrap();
        let mut e = entry(1);
        e.tags = vec!["rust".to_string(), "news".to_string()];

        let result = Reconciler::new(&db).reconcile(&outlet, vec![e]).await;
        assert_eq!(result.created[0].tags, vec!["news", "rust"]);

        let tags = db.list_tags().await.unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.contains(&existing));
    }

    #[tokio::test]
    async fn test_missing_pub_date_skips_only_that_entry() {
        let (db, outlet) = setup().await;
        let mut undated = entry(2);
        undated.pub_date = None;

        let result = Reconciler::new(&db)
            .reconcile(&outlet, vec![entry(1), undated, entry(3)])
            .await;

        assert_eq!(result.created.len(), 2);
        assert_eq!(result.skipped.len(), 1);
        assert!(matches!(
            result.skipped[0].error,
            EntryError::Reconciliation(EntryReconciliationError::MissingField("pub_date"))
        ));
        assert_eq!(
            result.skipped[0].entry.url.as_deref(),
            Some("http://example.org/entry/2")
        );
    }

    #[tokio::test]
    async fn test_missing_title_and_url_are_reported() {
        let (db, outlet) = setup().await;
        let mut untitled = entry(1);
        untitled.title = None;
        let mut unlinked = entry(2);
        unlinked.url = None;

        let result = Reconciler::new(&db)
            .reconcile(&outlet, vec![untitled, unlinked])
            .await;

        assert!(result.created.is_empty());
        let fields: Vec<&str> = result
            .skipped
            .iter()
            .map(|s| match &s.error {
                EntryError::Reconciliation(EntryReconciliationError::MissingField(f)) => *f,
                other => panic!("unexpected error: {:?}", other),
            })
            .collect();
        assert_eq!(fields, vec!["title", "url"]);
    }

    #[tokio::test]
    async fn test_missing_summary_defaults_to_empty() {
        let (db, outlet) = setup().await;
        let mut e = entry(1);
        e.summary = None;

        let result = Reconciler::new(&db).reconcile(&outlet, vec![e]).await;
        assert_eq!(result.created[0].summary, "");
    }

    #[tokio::test]
    async fn test_duplicate_url_is_skipped_as_duplicate() {
        let (db, outlet) = setup().await;
        let reconciler = Reconciler::new(&db);
        reconciler.reconcile(&outlet, vec![entry(1)]).await;

        let mut again = entry(1);
        again.title = Some("Edited title".to_string());
        let result = reconciler.reconcile(&outlet, vec![again, entry(2)]).await;

        assert_eq!(result.created.len(), 1);
        assert_eq!(result.skipped.len(), 1);
        match &result.skipped[0].error {
            EntryError::Duplicate(dup) => assert_eq!(dup.url, "http://example.org/entry/1"),
            other => panic!("expected duplicate, got {:?}", other),
        }

        let stored = db.list_articles(&Default::default()).await.unwrap();
        let first = stored
            .iter()
            .find(|a| a.url == "http://example.org/entry/1")
            .unwrap();
        assert_eq!(first.title, "Entry 1", "existing article is never updated");
    }

    #[tokio::test]
    async fn test_duplicate_entry_keeps_new_author_and_tag() {
        let (db, outlet) = setup().await;
        let reconciler = Reconciler::new(&db);
        reconciler.reconcile(&outlet, vec![entry(1)]).await;

        let mut again = entry(1);
        again.authors = vec!["Late Author".to_string()];
        again.tags = vec!["late-tag".to_string()];
        let result = reconciler.reconcile(&outlet, vec![again]).await;

        assert!(result.created.is_empty());
        assert!(matches!(result.skipped[0].error, EntryError::Duplicate(_)));
        assert!(db
            .find_author(outlet.id, "Late Author")
            .await
            .unwrap()
            .is_some());
        assert!(db.find_tag("late-tag").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_failure_skips_entry() {
        let (db, mut outlet) = setup().await;
        // An outlet id with no row violates the foreign key on authors
        outlet.id = 9999;
        let mut e = entry(1);
        e.authors = vec!["Ghost".to_string()];

        let result = Reconciler::new(&db).reconcile(&outlet, vec![e]).await;
        assert!(result.created.is_empty());
        assert!(matches!(
            result.skipped[0].error,
            EntryError::Reconciliation(EntryReconciliationError::Store(_))
        ));
    }
}
